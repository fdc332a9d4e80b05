use std::sync::Arc;

use serde::Serialize;
use warp::{Filter, Rejection, Reply};

use beacon_stream_lib::IceServerConfig;

/// Browser `RTCIceServer` shape; username and credential are always present.
#[derive(Debug, Serialize)]
struct ClientIceServer<'a> {
    urls: &'a str,
    username: &'a str,
    credential: &'a str,
}

fn client_ice_servers(servers: &[IceServerConfig]) -> Vec<ClientIceServer<'_>> {
    servers
        .iter()
        .map(|s| ClientIceServer {
            urls: &s.url,
            username: &s.username,
            credential: &s.password,
        })
        .collect()
}

/// `GET /ice` → the configured ICE servers as JSON
pub fn ice_route(
    servers: Vec<IceServerConfig>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let servers = Arc::new(servers);
    warp::get()
        .and(warp::path("ice"))
        .and(warp::path::end())
        .map(move || warp::reply::json(&client_ice_servers(&servers)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_servers_with_empty_credentials_kept() {
        let route = ice_route(vec![
            IceServerConfig::stun("stun:stun.l.google.com:19302"),
            IceServerConfig {
                url: "turn:turn.example.org:3478".into(),
                username: "user".into(),
                password: "pass".into(),
            },
        ]);

        let res = warp::test::request().method("GET").path("/ice").reply(&route).await;

        assert_eq!(res.status(), 200);
        assert_eq!(res.headers()["content-type"], "application/json");
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(
            body,
            serde_json::json!([
                {"urls": "stun:stun.l.google.com:19302", "username": "", "credential": ""},
                {"urls": "turn:turn.example.org:3478", "username": "user", "credential": "pass"}
            ])
        );
    }

    #[tokio::test]
    async fn only_get_is_served() {
        let route = ice_route(Vec::new());
        let res = warp::test::request().method("POST").path("/ice").reply(&route).await;
        assert_eq!(res.status(), 405);
    }
}
