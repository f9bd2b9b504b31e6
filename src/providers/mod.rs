pub mod fund_api;
pub mod seed;
pub mod util;
