//! Transaction helper for all-or-nothing storage work

use rusqlite::Connection;

use crate::Result;

/// Run `f` inside a transaction on `conn`.
///
/// On normal return the transaction is committed and the callback's value
/// returned; on any error the transaction is rolled back and the error
/// propagated. The callback may commit, roll back, or begin transactions
/// of its own: the wrapper only acts on whatever transaction state remains
/// when the callback exits.
///
/// # Panics
///
/// Panics if `conn` is already inside a transaction. That is a programming
/// error, not a recoverable condition.
pub fn in_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    assert!(
        conn.is_autocommit(),
        "in_transaction: connection is already inside a transaction"
    );
    conn.execute_batch("BEGIN")?;
    match f(conn) {
        Ok(value) => {
            if !conn.is_autocommit() {
                if let Err(err) = conn.execute_batch("COMMIT") {
                    if !conn.is_autocommit() {
                        let _ = conn.execute_batch("ROLLBACK");
                    }
                    return Err(err.into());
                }
            }
            Ok(value)
        }
        Err(err) => {
            if !conn.is_autocommit() {
                let _ = conn.execute_batch("ROLLBACK");
            }
            Err(err)
        }
    }
}
