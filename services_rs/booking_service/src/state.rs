use crate::domain::DepositRate;
use crate::gateway::GatewayClient;
use crate::notify::Notifier;
use crate::store::Store;
use crate::sweep::DepartureSweep;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub gateways: Arc<GatewayClient>,
    pub notifier: Notifier,
    pub sweep: Arc<DepartureSweep>,
    pub deposit_rate: DepositRate,
    pub frontend_url: String,
    pub env_name: String,
}
