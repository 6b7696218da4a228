use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;
use time::OffsetDateTime;

const RECORDS: &str = "join_logs";
const BY_QQ: &str = "join_logs_qq";
const BY_GROUP: &str = "join_logs_group";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStatus {
    #[serde(rename = "prepared")]
    Prepared,
    #[serde(rename = "joined")]
    Joined,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JoinRecord {
    pub id: u64,
    pub qq: i64,
    pub group_id: i64,
    pub status: JoinStatus,
    pub flag: Option<String>,
    pub comment: Option<String>,
    /// reserved for structured answers, always `None` for now
    pub answers: Option<serde_json::Value>,
    pub raw: Option<String>,
    /// unix seconds of the last write
    pub timestamp: i64,
}

struct Trees {
    db: sled::Db,
    records: sled::Tree,
    by_qq: sled::Tree,
    by_group: sled::Tree,
}

/// Join log persistence.
///
/// Every call takes the same guard for its whole duration, so concurrent
/// event handlers never interleave writes.
pub struct JoinLogStore {
    trees: Mutex<Trees>,
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn index_key(prefix: i64, id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&prefix.to_be_bytes());
    key[8..].copy_from_slice(&id.to_be_bytes());
    key
}

impl JoinLogStore {
    pub fn open(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create join logs dir {}", dir.display()))?;
        let db = sled::Config::new()
            .path(dir.join("join_logs.sled"))
            .open()
            .context("open join logs db")?;
        Self::from_db(db)
    }

    #[cfg(test)]
    pub fn open_temporary() -> anyhow::Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> anyhow::Result<Self> {
        let trees = Trees {
            records: db.open_tree(RECORDS)?,
            by_qq: db.open_tree(BY_QQ)?,
            by_group: db.open_tree(BY_GROUP)?,
            db,
        };
        Ok(Self {
            trees: Mutex::new(trees),
        })
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Trees>> {
        self.trees
            .lock()
            .map_err(|_| anyhow::anyhow!("join logs store lock poisoned"))
    }

    pub fn insert_prepared(
        &self,
        qq: i64,
        group_id: i64,
        flag: Option<&str>,
        comment: Option<&str>,
        raw: Option<&str>,
    ) -> anyhow::Result<JoinRecord> {
        let trees = self.lock()?;
        let record = JoinRecord {
            id: trees.db.generate_id()?,
            qq,
            group_id,
            status: JoinStatus::Prepared,
            flag: flag.map(ToOwned::to_owned),
            comment: comment.map(ToOwned::to_owned),
            answers: None,
            raw: raw.map(ToOwned::to_owned),
            timestamp: now(),
        };
        trees.put(&record)?;
        trees.db.flush()?;
        Ok(record)
    }

    /// Promotes the latest prepared row of `(qq, group_id)` to joined, or
    /// inserts a joined row when no request was seen.
    pub fn finalize_join(
        &self,
        qq: i64,
        group_id: i64,
        raw: Option<&str>,
    ) -> anyhow::Result<JoinRecord> {
        let trees = self.lock()?;
        let prepared = trees
            .records_of(qq)?
            .into_iter()
            .filter(|record| record.group_id == group_id)
            .filter(|record| record.status == JoinStatus::Prepared)
            .max_by_key(|record| record.id);

        let record = match prepared {
            Some(mut record) => {
                record.status = JoinStatus::Joined;
                record.raw = raw.map(ToOwned::to_owned);
                record.timestamp = now();
                record
            }
            None => JoinRecord {
                id: trees.db.generate_id()?,
                qq,
                group_id,
                status: JoinStatus::Joined,
                flag: None,
                comment: None,
                answers: None,
                raw: raw.map(ToOwned::to_owned),
                timestamp: now(),
            },
        };
        trees.put(&record)?;
        trees.db.flush()?;
        Ok(record)
    }

    /// Removes every row of `qq`, limited to one group when given. Returns the
    /// number of rows removed.
    pub fn delete_records(&self, qq: i64, group_id: Option<i64>) -> anyhow::Result<usize> {
        let trees = self.lock()?;
        let removed = trees
            .records_of(qq)?
            .into_iter()
            .filter(|record| group_id.map_or(true, |group_id| group_id == record.group_id))
            .collect::<Vec<_>>();
        trees.remove(&removed)?;
        trees.db.flush()?;
        Ok(removed.len())
    }

    /// All rows of `qq` across groups, most recent first.
    pub fn query_by_user(&self, qq: i64) -> anyhow::Result<Vec<JoinRecord>> {
        let trees = self.lock()?;
        Ok(trees
            .records_of(qq)?
            .into_iter()
            .sorted_by(|l, r| r.timestamp.cmp(&l.timestamp).then(r.id.cmp(&l.id)))
            .collect())
    }

    #[cfg(test)]
    pub fn overwrite_raw(&self, id: u64, value: &[u8]) -> anyhow::Result<()> {
        self.lock()?.records.insert(id.to_be_bytes(), value)?;
        Ok(())
    }

    #[cfg(test)]
    pub fn len(&self) -> anyhow::Result<usize> {
        Ok(self.lock()?.records.len())
    }

    /// Flushes pending writes. The db itself is released when the last
    /// handle drops, which for the installed plugin is process exit.
    pub fn flush(&self) -> anyhow::Result<()> {
        self.lock()?.db.flush().context("flush join logs db")?;
        Ok(())
    }
}

impl Trees {
    /// Writes the rows and both index entries in one transaction.
    fn put(&self, record: &JoinRecord) -> anyhow::Result<()> {
        let value = serde_json::to_vec(record)?;
        (&self.records, &self.by_qq, &self.by_group)
            .transaction(|(records, by_qq, by_group)| {
                records.insert(&record.id.to_be_bytes()[..], value.as_slice())?;
                by_qq.insert(&index_key(record.qq, record.id)[..], Vec::<u8>::new())?;
                by_group.insert(&index_key(record.group_id, record.id)[..], Vec::<u8>::new())?;
                Ok::<_, ConflictableTransactionError<()>>(())
            })
            .map_err(|err| anyhow::anyhow!("write join record {}: {:?}", record.id, err))
    }

    fn remove(&self, removed: &[JoinRecord]) -> anyhow::Result<()> {
        (&self.records, &self.by_qq, &self.by_group)
            .transaction(|(records, by_qq, by_group)| {
                for record in removed {
                    records.remove(&record.id.to_be_bytes()[..])?;
                    by_qq.remove(&index_key(record.qq, record.id)[..])?;
                    by_group.remove(&index_key(record.group_id, record.id)[..])?;
                }
                Ok::<_, ConflictableTransactionError<()>>(())
            })
            .map_err(|err| anyhow::anyhow!("remove join records: {:?}", err))
    }

    fn records_of(&self, qq: i64) -> anyhow::Result<Vec<JoinRecord>> {
        let mut records = Vec::new();
        for entry in self.by_qq.scan_prefix(qq.to_be_bytes()) {
            let (key, _) = entry?;
            let id = &key[8..];
            match self.records.get(id)? {
                Some(value) => records.push(
                    serde_json::from_slice(&value).context("decode join record")?,
                ),
                None => tracing::warn!("dangling qq index entry for {}", qq),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_prepared_creates_one_row() {
        let store = JoinLogStore::open_temporary().unwrap();
        let before = now();

        let record = store
            .insert_prepared(1001, 2002, Some("flag-1"), Some("hello"), Some("{}"))
            .unwrap();

        assert_eq!(record.status, JoinStatus::Prepared);
        assert_eq!(record.flag.as_deref(), Some("flag-1"));
        assert_eq!(record.comment.as_deref(), Some("hello"));
        assert!(record.answers.is_none());
        assert!(record.timestamp >= before);
        assert_eq!(store.query_by_user(1001).unwrap(), vec![record]);
    }

    #[test]
    fn ids_increase() {
        let store = JoinLogStore::open_temporary().unwrap();
        let a = store.insert_prepared(1, 10, None, None, None).unwrap();
        let b = store.insert_prepared(2, 10, None, None, None).unwrap();
        assert!(b.id > a.id);
    }

    #[test]
    fn finalize_updates_prepared_in_place() {
        let store = JoinLogStore::open_temporary().unwrap();
        let prepared = store
            .insert_prepared(1001, 2002, Some("f"), Some("c"), None)
            .unwrap();

        let joined = store.finalize_join(1001, 2002, Some("raw")).unwrap();

        assert_eq!(joined.id, prepared.id);
        assert_eq!(joined.status, JoinStatus::Joined);
        assert_eq!(joined.comment.as_deref(), Some("c"));
        assert_eq!(joined.raw.as_deref(), Some("raw"));
        assert_eq!(store.query_by_user(1001).unwrap().len(), 1);
    }

    #[test]
    fn finalize_picks_latest_prepared() {
        let store = JoinLogStore::open_temporary().unwrap();
        store.insert_prepared(1001, 2002, None, Some("old"), None).unwrap();
        let latest = store
            .insert_prepared(1001, 2002, None, Some("new"), None)
            .unwrap();

        let joined = store.finalize_join(1001, 2002, None).unwrap();

        assert_eq!(joined.id, latest.id);
        let statuses = store
            .query_by_user(1001)
            .unwrap()
            .into_iter()
            .map(|record| record.status)
            .filter(|status| *status == JoinStatus::Prepared)
            .count();
        assert_eq!(statuses, 1);
    }

    #[test]
    fn finalize_without_request_inserts_joined() {
        let store = JoinLogStore::open_temporary().unwrap();
        store.insert_prepared(1001, 3003, None, None, None).unwrap();

        let joined = store.finalize_join(1001, 2002, None).unwrap();

        assert_eq!(joined.status, JoinStatus::Joined);
        assert_eq!(joined.group_id, 2002);
        assert!(joined.comment.is_none());
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn finalize_ignores_joined_rows() {
        let store = JoinLogStore::open_temporary().unwrap();
        let first = store.finalize_join(1001, 2002, None).unwrap();
        let second = store.finalize_join(1001, 2002, None).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn delete_with_group_keeps_other_groups() {
        let store = JoinLogStore::open_temporary().unwrap();
        store.insert_prepared(1001, 2002, None, None, None).unwrap();
        store.insert_prepared(1001, 2002, None, None, None).unwrap();
        store.insert_prepared(1001, 3003, None, None, None).unwrap();
        store.insert_prepared(1002, 2002, None, None, None).unwrap();

        assert_eq!(store.delete_records(1001, Some(2002)).unwrap(), 2);

        let left = store.query_by_user(1001).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].group_id, 3003);
        assert_eq!(store.query_by_user(1002).unwrap().len(), 1);
    }

    #[test]
    fn delete_without_group_removes_all_of_user() {
        let store = JoinLogStore::open_temporary().unwrap();
        store.insert_prepared(1001, 2002, None, None, None).unwrap();
        store.finalize_join(1001, 3003, None).unwrap();
        store.insert_prepared(1002, 2002, None, None, None).unwrap();

        assert_eq!(store.delete_records(1001, None).unwrap(), 2);

        assert!(store.query_by_user(1001).unwrap().is_empty());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn query_is_most_recent_first() {
        let store = JoinLogStore::open_temporary().unwrap();
        {
            let trees = store.lock().unwrap();
            for (id, timestamp) in [(1u64, 100i64), (2, 300), (3, 200)] {
                trees
                    .put(&JoinRecord {
                        id,
                        qq: 7,
                        group_id: 8,
                        status: JoinStatus::Joined,
                        flag: None,
                        comment: None,
                        answers: None,
                        raw: None,
                        timestamp,
                    })
                    .unwrap();
            }
        }

        let timestamps = store
            .query_by_user(7)
            .unwrap()
            .into_iter()
            .map(|record| record.timestamp)
            .collect::<Vec<_>>();
        assert_eq!(timestamps, vec![300, 200, 100]);
    }

    #[test]
    fn negative_ids_do_not_collide() {
        let store = JoinLogStore::open_temporary().unwrap();
        store.insert_prepared(-1, 1, None, None, None).unwrap();
        store.insert_prepared(1, 1, None, None, None).unwrap();
        assert_eq!(store.query_by_user(-1).unwrap().len(), 1);
    }

    #[test]
    fn delete_clears_indexes() {
        let store = JoinLogStore::open_temporary().unwrap();
        store.insert_prepared(1001, 2002, None, None, None).unwrap();
        store.finalize_join(1001, 3003, None).unwrap();

        store.delete_records(1001, None).unwrap();

        let trees = store.lock().unwrap();
        assert!(trees.records.is_empty());
        assert!(trees.by_qq.is_empty());
        assert!(trees.by_group.is_empty());
    }

    #[test]
    fn put_writes_every_index() {
        let store = JoinLogStore::open_temporary().unwrap();
        let record = store.insert_prepared(1001, 2002, None, None, None).unwrap();

        let trees = store.lock().unwrap();
        assert_eq!(trees.records.len(), 1);
        assert!(trees
            .by_qq
            .contains_key(index_key(1001, record.id))
            .unwrap());
        assert!(trees
            .by_group
            .contains_key(index_key(2002, record.id))
            .unwrap());
    }

    #[test]
    fn undecodable_row_is_an_error() {
        let store = JoinLogStore::open_temporary().unwrap();
        let record = store.insert_prepared(1, 2, None, None, None).unwrap();
        store.overwrite_raw(record.id, b"not json").unwrap();
        assert!(store.query_by_user(1).is_err());
    }
}
