//! Table store with row-level change notification.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::rows::{FieldValues, FieldValuesExt, Operation, RowUpdate};

struct StoreInner {
    tables: Mutex<HashMap<String, BTreeMap<String, FieldValues>>>,
    watchers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<RowUpdate>>>>,
}

/// Shared handle to the table store.
///
/// Cloning the handle is cheap; all clones refer to the same tables.
/// Writes from any handle are visible to watchers registered on any
/// other handle, including writes a manager makes to its own watched
/// table (self-echo). Watchers that write status columns back should
/// filter those echoes with [`RowUpdate::changed_other_than`].
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                tables: Mutex::new(HashMap::new()),
                watchers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribes to row updates on a table.
    ///
    /// The returned receiver sees every New/Modify/Del on the table
    /// from the moment of subscription. Existing rows are not replayed;
    /// call [`Store::keys`] and [`Store::get`] for the initial sweep.
    pub fn watch(&self, table: &str) -> mpsc::UnboundedReceiver<RowUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watchers = self.inner.watchers.lock().unwrap_or_else(|e| e.into_inner());
        watchers.entry(table.to_string()).or_default().push(tx);
        rx
    }

    /// Inserts or replaces the full image of a row.
    ///
    /// Emits `New` when the key did not exist, `Modify` when the image
    /// differs from the stored one, and nothing when they are equal.
    pub fn upsert(&self, table: &str, key: &str, fvs: FieldValues) {
        let update = {
            let mut tables = self.inner.tables.lock().unwrap_or_else(|e| e.into_inner());
            let rows = tables.entry(table.to_string()).or_default();
            match rows.insert(key.to_string(), fvs.clone()) {
                None => RowUpdate {
                    table: table.to_string(),
                    key: key.to_string(),
                    op: Operation::New,
                    old: Vec::new(),
                    new: fvs,
                },
                Some(old) if old != fvs => RowUpdate {
                    table: table.to_string(),
                    key: key.to_string(),
                    op: Operation::Modify,
                    old,
                    new: fvs,
                },
                Some(_) => return,
            }
        };
        self.notify(update);
    }

    /// Updates named columns of a row, leaving other columns intact.
    ///
    /// The row is created when absent. Columns not named in `fvs` are
    /// preserved, which lets a state writer touch its status column
    /// without clobbering the config image.
    pub fn update_fields(&self, table: &str, key: &str, fvs: FieldValues) {
        let update = {
            let mut tables = self.inner.tables.lock().unwrap_or_else(|e| e.into_inner());
            let rows = tables.entry(table.to_string()).or_default();
            match rows.get_mut(key) {
                Some(row) => {
                    let old = row.clone();
                    for (field, value) in fvs {
                        if let Some(existing) = row.iter_mut().find(|(f, _)| *f == field) {
                            existing.1 = value;
                        } else {
                            row.push((field, value));
                        }
                    }
                    if *row == old {
                        return;
                    }
                    RowUpdate {
                        table: table.to_string(),
                        key: key.to_string(),
                        op: Operation::Modify,
                        old,
                        new: row.clone(),
                    }
                }
                None => {
                    rows.insert(key.to_string(), fvs.clone());
                    RowUpdate {
                        table: table.to_string(),
                        key: key.to_string(),
                        op: Operation::New,
                        old: Vec::new(),
                        new: fvs,
                    }
                }
            }
        };
        self.notify(update);
    }

    /// Deletes a row. Emits `Del` with the last image; no-op when the
    /// key does not exist.
    pub fn delete(&self, table: &str, key: &str) {
        let update = {
            let mut tables = self.inner.tables.lock().unwrap_or_else(|e| e.into_inner());
            let Some(rows) = tables.get_mut(table) else {
                return;
            };
            let Some(old) = rows.remove(key) else {
                return;
            };
            RowUpdate {
                table: table.to_string(),
                key: key.to_string(),
                op: Operation::Del,
                old,
                new: Vec::new(),
            }
        };
        self.notify(update);
    }

    /// Returns the current image of a row, if present.
    pub fn get(&self, table: &str, key: &str) -> Option<FieldValues> {
        let tables = self.inner.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables.get(table).and_then(|rows| rows.get(key)).cloned()
    }

    /// Returns the value of one field of a row, if present.
    pub fn get_field(&self, table: &str, key: &str, field: &str) -> Option<String> {
        self.get(table, key)
            .and_then(|row| row.get_field(field).map(str::to_string))
    }

    /// Returns the keys of a table in sorted order.
    pub fn keys(&self, table: &str) -> Vec<String> {
        let tables = self.inner.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables
            .get(table)
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn notify(&self, update: RowUpdate) {
        tracing::trace!(
            table = %update.table,
            key = %update.key,
            op = ?update.op,
            "Row update"
        );
        let mut watchers = self.inner.watchers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(senders) = watchers.get_mut(&update.table) {
            senders.retain(|tx| tx.send(update.clone()).is_ok());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fvs(pairs: &[(&str, &str)]) -> FieldValues {
        pairs
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_upsert_emits_new_then_modify() {
        let store = Store::new();
        let mut rx = store.watch("VPN_Tunnel");

        store.upsert("VPN_Tunnel", "vpn1", fvs(&[("enable", "true")]));
        let update = rx.recv().await.unwrap();
        assert_eq!(update.op, Operation::New);
        assert_eq!(update.key, "vpn1");

        store.upsert("VPN_Tunnel", "vpn1", fvs(&[("enable", "false")]));
        let update = rx.recv().await.unwrap();
        assert_eq!(update.op, Operation::Modify);
        assert_eq!(update.old.get_field("enable"), Some("true"));
        assert_eq!(update.new.get_field("enable"), Some("false"));
    }

    #[tokio::test]
    async fn test_upsert_identical_row_is_silent() {
        let store = Store::new();
        let mut rx = store.watch("VPN_Tunnel");

        store.upsert("VPN_Tunnel", "vpn1", fvs(&[("enable", "true")]));
        rx.recv().await.unwrap();

        store.upsert("VPN_Tunnel", "vpn1", fvs(&[("enable", "true")]));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_update_fields_preserves_other_columns() {
        let store = Store::new();
        store.upsert(
            "Tunnel_Interface",
            "tun1",
            fvs(&[("if_name", "Vpn_tun1"), ("enable", "true")]),
        );

        let mut rx = store.watch("Tunnel_Interface");
        store.update_fields("Tunnel_Interface", "tun1", fvs(&[("status", "enabled")]));

        let update = rx.recv().await.unwrap();
        assert_eq!(update.op, Operation::Modify);
        assert_eq!(update.new.get_field("if_name"), Some("Vpn_tun1"));
        assert_eq!(update.new.get_field("status"), Some("enabled"));
        assert!(!update.changed_other_than(&["status"]));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = Store::new();
        store.upsert("IPSec_State", "vpn1", fvs(&[("conn_state", "up")]));

        let mut rx = store.watch("IPSec_State");
        store.delete("IPSec_State", "vpn1");

        let update = rx.recv().await.unwrap();
        assert_eq!(update.op, Operation::Del);
        assert_eq!(update.old.get_field("conn_state"), Some("up"));
        assert!(update.new.is_empty());

        // Deleting again is silent.
        store.delete("IPSec_State", "vpn1");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_keys_sorted() {
        let store = Store::new();
        store.upsert("VPN_Tunnel", "b", fvs(&[]));
        store.upsert("VPN_Tunnel", "a", fvs(&[]));
        assert_eq!(store.keys("VPN_Tunnel"), vec!["a", "b"]);
        assert!(store.keys("Nonexistent").is_empty());
    }

    #[test]
    fn test_get_field() {
        let store = Store::new();
        store.upsert("VPN_Tunnel", "vpn1", fvs(&[("healthcheck_ip", "10.1.1.1")]));
        assert_eq!(
            store.get_field("VPN_Tunnel", "vpn1", "healthcheck_ip"),
            Some("10.1.1.1".to_string())
        );
        assert_eq!(store.get_field("VPN_Tunnel", "vpn1", "missing"), None);
    }
}
