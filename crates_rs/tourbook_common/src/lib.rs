pub mod internal_auth;
pub mod request_id;
pub mod secret_policy;
