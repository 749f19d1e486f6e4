use std::sync::Arc;

use relay_shared::clients::RedisClient;
use socketioxide::SocketIo;

use crate::bus::Bus;
use crate::config::AppConfig;
use crate::push::PushDispatcher;
use crate::registry::Registry;
use crate::socket::transport::SocketEmitter;

pub struct AppState {
    pub config: AppConfig,
    pub redis: RedisClient,
    pub bus: Bus,
    pub registry: Arc<Registry<SocketEmitter>>,
    pub io: SocketIo,
    pub http_client: reqwest::Client,
    pub instance_id: String,
    pub push: PushDispatcher,
}

pub type SharedState = Arc<AppState>;
