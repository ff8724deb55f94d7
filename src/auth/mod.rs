pub mod jwt;
pub mod users;

pub use jwt::{extract_jwt_from_headers, Claims, JwtManager};
pub use users::{Role, User, UserStore};
