use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims carried by the bearer token presented in the gateway
/// handshake. Issued by the account service; the gateway only verifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}
