pub mod credentials;

pub use credentials::{Credentials, TOKEN_ENV_VAR, mask_token};
