//! The ordered store (§4.2, §6.2): a key-sorted byte map with per-row
//! optional expiry, range scans, and a pluggable engine contract.

pub mod engine;
pub mod log;
pub mod log_cask;
pub mod memory;
pub mod txn;

pub use engine::{Engine, Row, Status};

/// A shared test suite run against every [`Engine`] implementation, in the
/// style of the teacher's own `test_engine!` macro
/// (`kv/src/storage/mod.rs`), extended with TTL expiry and the dedicated
/// counter row.
#[cfg(test)]
macro_rules! test_engine {
    ($engine:expr) => {
        #[test]
        fn point_ops() {
            let mut e = $engine;
            assert_eq!(e.get(b"a", 0).unwrap(), None);

            let row = |v: &[u8]| crate::storage::Row {
                value: v.to_vec(),
                versionstamp: "00000000000000000001".into(),
                expires_at: None,
            };

            e.set(b"a", row(b"1")).unwrap();
            assert_eq!(e.get(b"a", 0).unwrap().unwrap().value, b"1");

            e.set(b"a", row(b"2")).unwrap();
            assert_eq!(e.get(b"a", 0).unwrap().unwrap().value, b"2");

            e.delete(b"a").unwrap();
            assert_eq!(e.get(b"a", 0).unwrap(), None);

            // deleting an absent key is a no-op
            e.delete(b"a").unwrap();
        }

        #[test]
        fn expiry_filters_reads_and_scans() {
            let mut e = $engine;
            let row = crate::storage::Row {
                value: b"v".to_vec(),
                versionstamp: "00000000000000000001".into(),
                expires_at: Some(1000),
            };
            e.set(b"a", row).unwrap();
            assert!(e.get(b"a", 500).unwrap().is_some());
            assert!(e.get(b"a", 1000).unwrap().is_none());
            let rows = e.range_scan(b"", b"\xff\xff\xff", None, 500, 100, false).unwrap();
            assert_eq!(rows.len(), 1);
            let rows = e.range_scan(b"", b"\xff\xff\xff", None, 1000, 100, false).unwrap();
            assert_eq!(rows.len(), 0);
        }

        #[test]
        fn range_scan_forward_and_reverse() {
            let mut e = $engine;
            let row = |v: &[u8]| crate::storage::Row {
                value: v.to_vec(),
                versionstamp: "00000000000000000001".into(),
                expires_at: None,
            };
            for k in [b"a".as_slice(), b"b", b"c"] {
                e.set(k, row(k)).unwrap();
            }
            let fwd = e.range_scan(b"", b"\xff\xff\xff", None, 0, 100, false).unwrap();
            assert_eq!(
                fwd.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>(),
                vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
            );
            let rev = e.range_scan(b"", b"\xff\xff\xff", None, 0, 100, true).unwrap();
            assert_eq!(
                rev.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>(),
                vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]
            );
        }

        #[test]
        fn range_scan_excludes_anchor_key() {
            let mut e = $engine;
            let row = crate::storage::Row {
                value: b"v".to_vec(),
                versionstamp: "00000000000000000001".into(),
                expires_at: None,
            };
            e.set(b"a", row.clone()).unwrap();
            e.set(b"a\x00b", row).unwrap();
            let rows = e.range_scan(b"a", b"\xff\xff\xff", Some(b"a"), 0, 100, false).unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].0, b"a\x00b".to_vec());
        }

        #[test]
        fn limit_caps_results() {
            let mut e = $engine;
            let row = crate::storage::Row {
                value: b"v".to_vec(),
                versionstamp: "00000000000000000001".into(),
                expires_at: None,
            };
            for k in [b"a".as_slice(), b"b", b"c"] {
                e.set(k, row.clone()).unwrap();
            }
            let rows = e.range_scan(b"", b"\xff\xff\xff", None, 0, 2, false).unwrap();
            assert_eq!(rows.len(), 2);
        }

        #[test]
        fn cleanup_removes_expired_rows() {
            let mut e = $engine;
            let row = crate::storage::Row {
                value: b"v".to_vec(),
                versionstamp: "00000000000000000001".into(),
                expires_at: Some(1000),
            };
            e.set(b"a", row).unwrap();
            e.cleanup(2000).unwrap();
            let status = e.status().unwrap();
            assert_eq!(status.keys, 0);
        }

        #[test]
        fn clear_empties_everything() {
            let mut e = $engine;
            let row = crate::storage::Row {
                value: b"v".to_vec(),
                versionstamp: "00000000000000000001".into(),
                expires_at: None,
            };
            e.set(b"a", row).unwrap();
            e.clear().unwrap();
            assert_eq!(e.status().unwrap().keys, 0);
        }

        #[test]
        fn counter_is_independent_of_the_row_keyspace() {
            let mut e = $engine;
            assert_eq!(e.get_counter().unwrap(), 0);
            e.set_counter(41).unwrap();
            e.set_counter(e.get_counter().unwrap() + 1).unwrap();
            assert_eq!(e.get_counter().unwrap(), 42);
            assert_eq!(e.status().unwrap().keys, 0);
        }
    };
}

#[cfg(test)]
pub(super) use test_engine;
