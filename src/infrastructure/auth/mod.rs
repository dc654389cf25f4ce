mod claims;
mod jwt;

pub use claims::Claims;
pub use jwt::JwtValidator;
