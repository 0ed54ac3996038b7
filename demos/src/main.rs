use kvdb::db::{Database, OpenOptions, SetOptions};
use kvdb::error::Error;
use kvdb::key::KeyPart;
use kvdb::list::{ListOptions, Selector};
use kvdb::value::Value;

fn main() {
    println!("Hello, kvdb!");

    run().unwrap();

    println!("Bye~");
}

fn key(parts: &[&str]) -> Vec<KeyPart> {
    parts.iter().map(|p| KeyPart::Text(p.to_string())).collect()
}

fn run() -> Result<(), Error> {
    let dir = tempdir::TempDir::new("kvdb-demo")?;
    let storage_path = dir.path().join("kvdb");

    let db = Database::open(&storage_path, OpenOptions::default())?;

    db.set(key(&["users", "alice"]), Value::Json(serde_json::json!({"age": 30})), SetOptions::default())?;
    db.set(key(&["users", "bob"]), Value::Json(serde_json::json!({"age": 25})), SetOptions::default())?;

    let alice = db.get(&key(&["users", "alice"]))?;
    println!("alice: {:?}", alice.value);

    db.delete(key(&["users", "bob"]))?;
    assert_eq!(db.get(&key(&["users", "bob"]))?.value, None);

    let entries: Vec<_> =
        db.list(Selector::Prefix { prefix: key(&["users"]) }, ListOptions::default())?.collect::<Result<Vec<_>, Error>>()?;
    println!("remaining users: {}", entries.len());

    let outcome = db
        .atomic()?
        .check(key(&["users", "alice"]), alice.versionstamp.clone())?
        .set(key(&["users", "alice"]), Value::Json(serde_json::json!({"age": 31})), None)?
        .commit()?;
    println!("conditional update ok: {}", outcome.ok);

    db.compact()?;
    db.close()?;

    Ok(())
}
