pub mod client;
pub mod session;
pub mod storage;
pub mod token;

pub use client::AuthClient;
pub use session::{SessionController, SessionState};
pub use storage::{FileTokenStore, MemoryTokenStore, StorageError, TokenStore};
pub use token::{
    decode_claims, Claims, Clock, Credentials, FixedClock, Role, SessionUser, SystemClock,
    TokenClock, TokenError, TokenPair, DEFAULT_REFRESH_THRESHOLD_SECS,
};
