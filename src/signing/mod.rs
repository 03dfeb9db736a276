pub mod hmac;
pub mod token_authority;

pub use hmac::HmacSigner;
pub use token_authority::TokenAuthority;
