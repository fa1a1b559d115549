use crate::config::ClientConfig;
use crate::testutil::MockDaemon;
use crate::OlvidClient;

mod commands;
mod lifecycle;

async fn connect(daemon: &MockDaemon, client_key: &str) -> OlvidClient {
    OlvidClient::connect_with(
        ClientConfig::new()
            .client_key(client_key)
            .server_target(daemon.target()),
    )
    .await
    .expect("connect to mock daemon")
}
