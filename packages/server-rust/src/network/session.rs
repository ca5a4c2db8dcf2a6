//! Session binding: the first valid request fixes the AES key for the
//! lifetime of the process and opens the database with it.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::Mutex;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use super::channel::{ChannelError, PacketHandler, SESSION_KEY_LEN};
use crate::db::{BinaryDbConfiguration, Db, DbError};
use crate::protocol::{encode_error, execute, DbCommand};

/// Opens the database for a freshly bound session key.
pub type DbFactory = Box<dyn Fn(&[u8; SESSION_KEY_LEN]) -> Result<Db, DbError> + Send + Sync>;

struct Session {
    key: [u8; SESSION_KEY_LEN],
    db: Mutex<Db>,
}

impl Session {
    fn check(&self, key: &[u8; SESSION_KEY_LEN]) -> Result<&Mutex<Db>, ChannelError> {
        if bool::from(self.key.as_slice().ct_eq(key.as_slice())) {
            Ok(&self.db)
        } else {
            Err(ChannelError::SessionMismatch)
        }
    }
}

/// Process-wide session, shared by every connection.
pub struct SessionState {
    session: OnceLock<Session>,
    init_lock: Mutex<()>,
    factory: DbFactory,
}

impl SessionState {
    #[must_use]
    pub fn new(factory: DbFactory) -> Self {
        Self {
            session: OnceLock::new(),
            init_lock: Mutex::new(()),
            factory,
        }
    }

    /// Session over the encrypted binary database in `data_folder`.
    #[must_use]
    pub fn for_folder(data_folder: PathBuf, max_items: usize) -> Self {
        Self::new(Box::new(move |key| {
            Db::open(&data_folder, &BinaryDbConfiguration::new(*key), max_items)
        }))
    }

    /// Binds `key` on first use, then only accepts the same key.
    ///
    /// The first caller opens the database and builds its bucket index
    /// while holding the init lock; concurrent callers wait for it.
    ///
    /// # Errors
    ///
    /// [`ChannelError::SessionMismatch`] for a different key,
    /// [`ChannelError::DbInit`] when the database cannot be opened.
    pub fn bind(&self, key: &[u8; SESSION_KEY_LEN]) -> Result<&Mutex<Db>, ChannelError> {
        if let Some(session) = self.session.get() {
            return session.check(key);
        }
        let _guard = self.init_lock.lock();
        if let Some(session) = self.session.get() {
            return session.check(key);
        }

        let started = Instant::now();
        let mut db = (self.factory)(key).map_err(ChannelError::DbInit)?;
        let buckets = db.init().map_err(ChannelError::DbInit)?;
        info!(
            buckets,
            elapsed_ms = started.elapsed().as_millis(),
            "session bound, database initialised"
        );
        let session = self.session.get_or_init(|| Session {
            key: *key,
            db: Mutex::new(db),
        });
        Ok(&session.db)
    }

    /// The bound database, if any request has succeeded yet.
    #[must_use]
    pub fn db(&self) -> Option<&Mutex<Db>> {
        self.session.get().map(|s| &s.db)
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.session.get().is_some()
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("bound", &self.is_bound())
            .finish_non_exhaustive()
    }
}

/// Binds the session, then runs decode, execute, encode.
///
/// Malformed commands and domain failures become error responses; only
/// session failures drop the connection.
#[derive(Debug, Clone)]
pub struct DbPacketHandler {
    session: Arc<SessionState>,
}

impl DbPacketHandler {
    #[must_use]
    pub fn new(session: Arc<SessionState>) -> Self {
        Self { session }
    }
}

impl PacketHandler for DbPacketHandler {
    fn handle(
        &self,
        session_key: &[u8; SESSION_KEY_LEN],
        body: &[u8],
    ) -> Result<Vec<u8>, ChannelError> {
        let db = self.session.bind(session_key)?;
        let command = match DbCommand::decode(body) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "rejected command");
                return Ok(encode_error(&e.to_string()));
            }
        };
        let id = command.id();
        let result = execute(&mut db.lock(), command);
        Ok(match result {
            Ok(response) => response.encode(),
            Err(e) => {
                warn!(command = ?id, error = %e, "command failed");
                encode_error(&e.to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tsvault_core::{BinaryData, StorageError};

    use super::*;
    use crate::protocol::{decode_response, DictsResponse, STATUS_ERROR};

    fn counting_state(dir: &std::path::Path, opened: Arc<AtomicU32>) -> SessionState {
        let folder = dir.to_path_buf();
        SessionState::new(Box::new(move |key| {
            opened.fetch_add(1, Ordering::SeqCst);
            Db::open(&folder, &BinaryDbConfiguration::new(*key), 4)
        }))
    }

    #[test]
    fn first_key_wins() {
        let dir = tempfile::tempdir().unwrap();
        let opened = Arc::new(AtomicU32::new(0));
        let state = counting_state(dir.path(), Arc::clone(&opened));
        assert!(!state.is_bound());

        state.bind(&[1u8; SESSION_KEY_LEN]).unwrap();
        state.bind(&[1u8; SESSION_KEY_LEN]).unwrap();
        assert!(state.is_bound());
        assert_eq!(opened.load(Ordering::SeqCst), 1);

        assert!(matches!(
            state.bind(&[2u8; SESSION_KEY_LEN]),
            Err(ChannelError::SessionMismatch)
        ));
    }

    #[test]
    fn concurrent_binds_open_once() {
        let dir = tempfile::tempdir().unwrap();
        let opened = Arc::new(AtomicU32::new(0));
        let state = Arc::new(counting_state(dir.path(), Arc::clone(&opened)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || state.bind(&[9u8; SESSION_KEY_LEN]).is_ok())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_init_leaves_session_unbound() {
        let state = SessionState::new(Box::new(|_| {
            Err(DbError::Storage(StorageError::Unsupported("test")))
        }));
        assert!(matches!(
            state.bind(&[1u8; SESSION_KEY_LEN]),
            Err(ChannelError::DbInit(_))
        ));
        assert!(!state.is_bound());
        assert!(state.db().is_none());
    }

    #[test]
    fn handler_answers_commands_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(SessionState::for_folder(dir.path().to_path_buf(), 4));
        let handler = DbPacketHandler::new(state);
        let key = [3u8; SESSION_KEY_LEN];

        let response = handler.handle(&key, &DbCommand::Dicts.encode()).unwrap();
        let payload = decode_response(&response).unwrap().unwrap();
        assert_eq!(DictsResponse::from_bytes(&payload).unwrap(), DictsResponse::default());

        let response = handler.handle(&key, &[42]).unwrap();
        assert_eq!(response[0], STATUS_ERROR);
        assert_eq!(
            decode_response(&response).unwrap(),
            Err("unknown database command 42".to_string())
        );

        let response = handler
            .handle(&key, &DbCommand::DeleteOp { date: 20_240_101, id: 0 }.encode())
            .unwrap();
        assert_eq!(
            decode_response(&response).unwrap(),
            Err("operation 0 not found for date 20240101".to_string())
        );
    }
}
