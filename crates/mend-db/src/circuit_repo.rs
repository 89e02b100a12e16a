use crate::util::{decode_enum, decode_json, encode_enum, encode_json, from_rfc3339, to_rfc3339};
use mend_core::circuit::CircuitRepository;
use mend_core::error::CircuitError;
use mend_core::types::{CircuitPhase, CircuitState};
use rusqlite::{Connection, Row};
use std::sync::{Mutex, MutexGuard};

pub struct CircuitRepo<'a> {
    conn: &'a Mutex<Connection>,
}

impl<'a> CircuitRepo<'a> {
    pub fn new(conn: &'a Mutex<Connection>) -> Self {
        Self { conn }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("connection poisoned")
    }
}

fn store_err(err: impl std::fmt::Display) -> CircuitError {
    CircuitError::Store {
        message: err.to_string(),
    }
}

const COLUMNS: &str = "signature, repository, branch, error_pattern, phase, failure_count, \
                       last_failure_at, opened_at, auto_reset_at, manually_reset_by, history";

fn map_circuit_row(row: &Row<'_>) -> Result<CircuitState, CircuitError> {
    let phase: String = row.get(4).map_err(store_err)?;
    let last_failure: Option<String> = row.get(6).map_err(store_err)?;
    let opened: Option<String> = row.get(7).map_err(store_err)?;
    let auto_reset: Option<String> = row.get(8).map_err(store_err)?;
    let history: String = row.get(10).map_err(store_err)?;
    Ok(CircuitState {
        signature: row.get(0).map_err(store_err)?,
        repository: row.get(1).map_err(store_err)?,
        branch: row.get(2).map_err(store_err)?,
        error_pattern: row.get(3).map_err(store_err)?,
        phase: decode_enum(&phase).map_err(store_err)?,
        failure_count: row.get::<_, i64>(5).map_err(store_err)? as u32,
        last_failure_at: last_failure
            .map(|v| from_rfc3339(&v))
            .transpose()
            .map_err(store_err)?,
        opened_at: opened.map(|v| from_rfc3339(&v)).transpose().map_err(store_err)?,
        auto_reset_at: auto_reset
            .map(|v| from_rfc3339(&v))
            .transpose()
            .map_err(store_err)?,
        manually_reset_by: row.get(9).map_err(store_err)?,
        history: decode_json(&history).map_err(store_err)?,
    })
}

impl<'a> CircuitRepository for CircuitRepo<'a> {
    fn get(&self, signature: &str) -> Result<Option<CircuitState>, CircuitError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("SELECT {COLUMNS} FROM circuits WHERE signature = ?1"))
            .map_err(store_err)?;
        let mut rows = stmt.query([signature]).map_err(store_err)?;
        match rows.next().map_err(store_err)? {
            Some(row) => map_circuit_row(row).map(Some),
            None => Ok(None),
        }
    }

    fn upsert(&self, state: &CircuitState) -> Result<(), CircuitError> {
        self.conn()
            .execute(
                "INSERT INTO circuits (signature, repository, branch, error_pattern, phase, \
                 failure_count, last_failure_at, opened_at, auto_reset_at, manually_reset_by, history) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
                 ON CONFLICT(signature) DO UPDATE SET \
                 phase = excluded.phase, failure_count = excluded.failure_count, \
                 last_failure_at = excluded.last_failure_at, opened_at = excluded.opened_at, \
                 auto_reset_at = excluded.auto_reset_at, \
                 manually_reset_by = excluded.manually_reset_by, history = excluded.history",
                (
                    &state.signature,
                    &state.repository,
                    &state.branch,
                    &state.error_pattern,
                    encode_enum(&state.phase).map_err(store_err)?,
                    state.failure_count as i64,
                    state.last_failure_at.map(|v| to_rfc3339(&v)),
                    state.opened_at.map(|v| to_rfc3339(&v)),
                    state.auto_reset_at.map(|v| to_rfc3339(&v)),
                    state.manually_reset_by.as_deref(),
                    encode_json(&state.history).map_err(store_err)?,
                ),
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn list_open(&self) -> Result<Vec<CircuitState>, CircuitError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("SELECT {COLUMNS} FROM circuits WHERE phase = ?1"))
            .map_err(store_err)?;
        let open = encode_enum(&CircuitPhase::Open).map_err(store_err)?;
        let mut rows = stmt.query([open]).map_err(store_err)?;
        let mut circuits = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            circuits.push(map_circuit_row(row)?);
        }
        Ok(circuits)
    }

    fn count_open(&self) -> Result<u64, CircuitError> {
        let open = encode_enum(&CircuitPhase::Open).map_err(store_err)?;
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM circuits WHERE phase = ?1", [open], |row| {
                row.get(0)
            })
            .map_err(store_err)?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::with_test_db;
    use chrono::Utc;
    use mend_core::types::CircuitTransition;

    #[test]
    fn upsert_round_trips_state_and_history() {
        let conn = Mutex::new(with_test_db().unwrap());
        let repo = CircuitRepo::new(&conn);
        let mut state = CircuitState::new(
            "abcd1234abcd1234".to_string(),
            "x/y".to_string(),
            "main".to_string(),
            "npm install timeout".to_string(),
        );
        state.failure_count = 3;
        state.phase = CircuitPhase::Open;
        state.opened_at = Some(Utc::now());
        state.auto_reset_at = Some(Utc::now() + chrono::Duration::hours(24));
        state.history.push(CircuitTransition {
            from: CircuitPhase::Closed,
            to: CircuitPhase::Open,
            reason: "failure threshold reached (3)".to_string(),
            at: Utc::now(),
            actor: "system".to_string(),
        });
        repo.upsert(&state).unwrap();

        let loaded = repo.get("abcd1234abcd1234").unwrap().unwrap();
        assert_eq!(loaded.phase, CircuitPhase::Open);
        assert_eq!(loaded.failure_count, 3);
        assert_eq!(loaded.history.len(), 1);
        assert_eq!(repo.count_open().unwrap(), 1);

        // Survives a phase change (the update arm of the upsert).
        let mut closed = loaded.clone();
        closed.phase = CircuitPhase::Closed;
        closed.failure_count = 0;
        repo.upsert(&closed).unwrap();
        assert_eq!(repo.count_open().unwrap(), 0);
    }
}
