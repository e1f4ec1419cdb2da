include!("http/core.rs");
include!("http/points.rs");
include!("http/admin.rs");
