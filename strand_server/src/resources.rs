use async_trait::async_trait;
use client_listener::{Resource, ResourceRegistry, ResourceRequest, ServeError};
use std::{sync::Arc, time::Duration};
use strand_network::http::{Code, HttpError, Response};
use strand_remote::{HostPort, Remote, RemoteError, Request};

/// Longest a relayed request may take
const RELAY_TIMEOUT: Duration = Duration::from_secs(30);

/// What built-in resources are constructed from
pub struct ResourceEnv
{
    pub server_name: String,
    pub remote: Arc<Remote>,
}

/// A resource compiled into the server, registered with `inventory::submit!`
pub struct ResourceRegistration
{
    pub path: &'static str,
    /// Serves every path below `path` as well
    pub directory: bool,
    pub build: fn(&ResourceEnv) -> Arc<dyn Resource>,
}

inventory::collect!(ResourceRegistration);

/// Add every compiled-in resource to `registry`
pub fn register_builtin(registry: &ResourceRegistry, env: &ResourceEnv)
{
    for reg in inventory::iter::<ResourceRegistration>
    {
        tracing::debug!("registering built-in resource {}", reg.path);
        registry.add(reg.path, reg.directory, (reg.build)(env));
    }
}

/// `GET /_strand/version`
struct Version
{
    name: String,
}

#[async_trait]
impl Resource for Version
{
    async fn handle(&self, request: &mut ResourceRequest) -> Result<(), ServeError>
    {
        request.require_method("GET")?;

        let body = serde_json::json!({
            "server": {
                "name": self.name,
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        request.respond(Response::json(Code::OK, &body)).await
    }
}

fn version(env: &ResourceEnv) -> Arc<dyn Resource>
{
    Arc::new(Version { name: env.server_name.clone() })
}

inventory::submit! {
    ResourceRegistration { path: "/_strand/version", directory: false, build: version }
}

/// `GET /_strand/remote/version/<host:port>`: ask a remote server for its
/// version through the outbound pool
struct RemoteVersion
{
    remote: Arc<Remote>,
}

fn relay_error(target: &HostPort, e: RemoteError) -> HttpError
{
    match e
    {
        RemoteError::Http(e) => HttpError::new(Code::BAD_GATEWAY, format!("{} returned {}", target, e.code)),
        RemoteError::Timeout => HttpError::new(Code::GATEWAY_TIMEOUT, format!("{} timed out", target)),
        RemoteError::Shutdown => HttpError::new(Code::SERVICE_UNAVAILABLE, "Shutting down"),
        e => HttpError::new(Code::BAD_GATEWAY, format!("{}: {}", target, e)),
    }
}

#[async_trait]
impl Resource for RemoteVersion
{
    async fn handle(&self, request: &mut ResourceRequest) -> Result<(), ServeError>
    {
        request.require_method("GET")?;

        let target: HostPort = request.param(0)
                                      .ok_or_else(|| HttpError::bad_request("No remote given"))?
                                      .parse()
                                      .map_err(|e: RemoteError| HttpError::bad_request(e.to_string()))?;

        tracing::debug!("client[{}]: relaying version request to {}", request.remote(), target);

        let mut relayed = Request::get(target.clone(), "/_matrix/federation/v1/version").with_opts(self.remote.opts());
        self.remote.submit(&mut relayed);

        let response = relayed.wait(RELAY_TIMEOUT).await.map_err(|e| relay_error(&target, e))?;
        request.respond(Response::new(Code::OK).with_content("application/json", response.content)).await
    }
}

fn remote_version(env: &ResourceEnv) -> Arc<dyn Resource>
{
    Arc::new(RemoteVersion { remote: Arc::clone(&env.remote) })
}

inventory::submit! {
    ResourceRegistration { path: "/_strand/remote/version", directory: true, build: remote_version }
}
