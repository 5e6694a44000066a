pub mod retry;
pub mod rpc;
pub mod types;

pub use retry::{Attempted, RetryPolicy};
pub use rpc::{RpcBalanceSource, SolanaClientError};
