//! Authentication module
//!
//! This module provides the credential lifecycle:
//! - Password hashing with Argon2id in a self-describing record
//! - Password strength rules
//! - Access token signing and verification (HS256 JWT)
//! - Refresh token storage with atomic rotation
//! - Token pair issuance and refresh
//! - Middleware that admits requests carrying a valid access token
//! - Registration and login on top of a user directory

pub mod jwt;
pub mod middleware;
pub mod password;
pub mod service;
pub mod session;
pub mod store;
pub mod strength;
pub mod users;

pub use jwt::{AccessTokenCodec, Claims, JwtError, ACCESS_TOKEN_TYPE};
pub use middleware::{
    auth_middleware, extract_bearer_token, AuthError, AuthGate, AuthGateConfig, AuthenticatedUser,
};
pub use password::{Argon2Params, PasswordError, PasswordHasher, PasswordRecord};
pub use service::{
    AuthResponse, AuthService, LoginRequest, LogoutRequest, RefreshRequest, RegisterRequest,
    UserInfo,
};
pub use session::{SessionError, TokenPair, TokenSessionManager};
pub use store::{
    spawn_purge_task, InMemoryRefreshTokenStore, PgRefreshTokenStore, RefreshTokenStore,
    RotatedToken, StoreError,
};
pub use strength::{
    CommonPasswordError, CommonPasswordSet, PasswordInput, PasswordValidator, PasswordViolation,
};
pub use users::{
    DirectoryError, InMemoryUserDirectory, NewUser, PgUserDirectory, UserDirectory, UserRecord,
};
