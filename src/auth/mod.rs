mod helpers;
mod middleware;
mod password;
mod token;

pub use helpers::{TokenValidationError, ValidatedToken, extract_token_from_header, validate_token};
pub use middleware::{AuthError, MaybeUser, RequireAdmin, RequireAuth, RequireUser};
pub use password::{CharClass, PasswordPolicy};
pub use token::{CredentialHasher, TOKEN_PREFIX, parse_token};
