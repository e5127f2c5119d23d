//! 拓扑信息服务
//!
//! Coherence 成员启动时通过 `GET /site/<node>` 与 `GET /rack/<node>`
//! 查询所在节点的站点与机架标签。任何查询失败都返回空的 200 响应，
//! 成员启动不因拓扑信息缺失而失败。

use anyhow::{Context, Result};
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::client::KubeOps;
use crate::flags::OperatorFlags;

/// 查询的拓扑层级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    Site,
    Rack,
}

/// 解析请求路径，节点名取最后一段
pub fn route(path: &str) -> Option<(Topology, &str)> {
    let path = path.trim_start_matches('/');
    let (prefix, node) = path.split_once('/')?;
    let topology = match prefix {
        "site" => Topology::Site,
        "rack" => Topology::Rack,
        _ => return None,
    };
    let node = node.rsplit('/').next().filter(|n| !n.is_empty())?;
    Some((topology, node))
}

/// 拓扑服务
#[derive(Clone)]
pub struct TopologyServer {
    client: Arc<dyn KubeOps>,
    site_label: String,
    rack_label: String,
}

impl TopologyServer {
    pub fn new(client: Arc<dyn KubeOps>, flags: &OperatorFlags) -> Self {
        Self {
            client,
            site_label: flags.site_label.clone(),
            rack_label: flags.rack_label.clone(),
        }
    }

    /// 绑定地址并在后台提供服务，绑定失败时立即返回错误
    pub fn start(self, addr: SocketAddr) -> Result<()> {
        let builder = Server::try_bind(&addr).with_context(|| format!("绑定拓扑服务地址 {} 失败", addr))?;

        let make_svc = make_service_fn(move |_| {
            let server = self.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.handle(req).await) }
                }))
            }
        });

        info!("拓扑服务启动在 {}", addr);
        tokio::spawn(async move {
            if let Err(e) = builder.serve(make_svc).await {
                error!("拓扑服务错误: {}", e);
            }
        });
        Ok(())
    }

    /// 处理一个请求
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let route = match req.method() {
            &Method::GET => route(req.uri().path()),
            _ => None,
        };
        let Some((topology, node)) = route else {
            return status(StatusCode::NOT_FOUND, Body::from("Not Found"));
        };

        let label = match topology {
            Topology::Site => &self.site_label,
            Topology::Rack => &self.rack_label,
        };
        let value = match self.client.node_labels(node).await {
            Ok(Some(labels)) => labels.get(label).cloned().unwrap_or_default(),
            Ok(None) => {
                debug!(node, "节点不存在");
                String::new()
            }
            Err(e) => {
                warn!(node, error = %e, "读取节点标签失败");
                String::new()
            }
        };
        debug!(node, ?topology, value = %value, "返回拓扑信息");
        status(StatusCode::OK, Body::from(value))
    }
}

fn status(code: StatusCode, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = code;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockKubeOps;
    use crate::error::Error;
    use rstest::rstest;
    use std::collections::BTreeMap;

    #[rstest]
    #[case("/site/node-1", Some((Topology::Site, "node-1")))]
    #[case("/rack/node-2", Some((Topology::Rack, "node-2")))]
    #[case("/site/a/b/node-3", Some((Topology::Site, "node-3")))]
    #[case("/site/", None)]
    #[case("/zone/node-1", None)]
    #[case("/", None)]
    fn test_route(#[case] path: &str, #[case] expected: Option<(Topology, &str)>) {
        assert_eq!(route(path), expected);
    }

    fn server(client: MockKubeOps) -> TopologyServer {
        TopologyServer::new(Arc::new(client), &OperatorFlags::default())
    }

    async fn get(server: &TopologyServer, path: &str) -> (StatusCode, String) {
        let req = Request::get(path).body(Body::empty()).unwrap();
        let resp = server.handle(req).await;
        let code = resp.status();
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        (code, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_site_and_rack_labels() {
        let flags = OperatorFlags::default();
        let (site, rack) = (flags.site_label.clone(), flags.rack_label.clone());
        let mut client = MockKubeOps::new();
        client.expect_node_labels().returning(move |_| {
            Ok(Some(BTreeMap::from([
                (site.clone(), "zone-a".to_string()),
                (rack.clone(), "rack-7".to_string()),
            ])))
        });
        let server = server(client);

        assert_eq!(get(&server, "/site/n1").await, (StatusCode::OK, "zone-a".into()));
        assert_eq!(get(&server, "/rack/n1").await, (StatusCode::OK, "rack-7".into()));
    }

    #[tokio::test]
    async fn test_lookup_failure_is_empty_ok() {
        let mut client = MockKubeOps::new();
        client
            .expect_node_labels()
            .returning(|_| Err(Error::Store("unreachable".into())));
        let server = server(client);
        assert_eq!(get(&server, "/site/n1").await, (StatusCode::OK, String::new()));
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let mut client = MockKubeOps::new();
        client.expect_node_labels().never();
        let server = server(client);
        assert_eq!(get(&server, "/healthz").await.0, StatusCode::NOT_FOUND);
    }
}
