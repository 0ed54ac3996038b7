#[cfg(test)]
mod test {
    use assert_cmd::prelude::*;
    use predicates::prelude::*;
    use std::process::Command;

    #[test]
    fn unknown_subcommand_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let mut cmd = Command::cargo_bin("kvdb")?;

        cmd.arg("foobar").arg("test/file/doesnt/exist");
        cmd.assert().failure().stderr(predicate::str::contains("unrecognized subcommand"));

        Ok(())
    }

    #[test]
    fn non_interactive_query_runs_against_a_temp_store() -> Result<(), Box<dyn std::error::Error>> {
        let dir = assert_fs::TempDir::new()?;
        let mut cmd = Command::cargo_bin("kvdb")?;

        cmd.arg("--config").arg("does/not/exist.yaml").arg("--non-interactive").arg("--query=SET greeting hi");
        cmd.current_dir(&dir);
        cmd.assert().success().stdout(predicate::str::contains("OK"));

        Ok(())
    }
}
