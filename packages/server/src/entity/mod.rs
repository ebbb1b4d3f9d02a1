//! Entity models, split by scope: `shared` lives in the `public` schema,
//! `clinical` tables exist once per tenant schema and are resolved through
//! the connection's `search_path`.

pub mod clinical;
pub mod shared;
pub mod types;
