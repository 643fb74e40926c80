pub mod error;
pub mod keypair;
pub mod payment;

pub use error::{BuildError, Error, Result};
pub use keypair::{decode_account_id, encode_account_id, is_valid_account_id, Keypair};
pub use payment::{PaymentStatus, ReceivedPayment};
