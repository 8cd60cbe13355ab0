use crate::*;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::{collections::HashMap, sync::Arc};
use strand_network::{
    http::{Code, HttpError, RequestHead, Response},
    invariant_violation, Socket,
};

/// Something that answers requests for a path.
#[async_trait]
pub trait Resource: Send + Sync
{
    /// Handle one request. Returning without responding sends an empty
    /// `200 OK`; returning an [`HttpError`] sends that status instead.
    async fn handle(&self, request: &mut ResourceRequest) -> Result<(), ServeError>;
}

#[derive(Clone)]
struct Entry
{
    resource: Arc<dyn Resource>,
    directory: bool,
}

/// Maps request paths to resources.
///
/// A resource registered as a directory also answers every path below it;
/// the remaining path segments are passed to it as parameters. The longest
/// matching directory wins. Lookups never block registration changes.
pub struct ResourceRegistry
{
    entries: ArcSwap<HashMap<String, Entry>>,
}

impl Default for ResourceRegistry
{
    fn default() -> Self
    {
        Self::new()
    }
}

fn normalise(path: &str) -> &str
{
    match path.trim_end_matches('/')
    {
        "" => "/",
        trimmed => trimmed,
    }
}

impl ResourceRegistry
{
    pub fn new() -> Self
    {
        Self { entries: ArcSwap::from_pointee(HashMap::new()) }
    }

    /// Register `resource` at `path`, replacing anything already there
    pub fn add(&self, path: &str, directory: bool, resource: Arc<dyn Resource>)
    {
        let path = normalise(path).to_string();
        let entry = Entry { resource, directory };

        let previous = self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(path.clone(), entry.clone());
            next
        });

        if previous.contains_key(&path)
        {
            tracing::debug!("Replaced resource at {}", path);
        }
    }

    /// Remove the resource at `path`. Returns whether there was one.
    pub fn remove(&self, path: &str) -> bool
    {
        let path = normalise(path);
        let previous = self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(path);
            next
        });
        previous.contains_key(path)
    }

    pub fn paths(&self) -> Vec<String>
    {
        let mut paths: Vec<_> = self.entries.load().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Find the resource for `path`, with any parameters below a directory match
    pub fn find(&self, path: &str) -> Option<(Arc<dyn Resource>, Vec<String>)>
    {
        let entries = self.entries.load();
        let path = normalise(path);

        if let Some(entry) = entries.get(path)
        {
            return Some((Arc::clone(&entry.resource), Vec::new()));
        }

        let mut prefix = path;
        while let Some(split) = prefix.rfind('/')
        {
            prefix = if split == 0 { "/" } else { &prefix[..split] };

            if let Some(entry) = entries.get(prefix).filter(|e| e.directory)
            {
                let params = path[prefix.len()..].split('/')
                                                 .filter(|s| !s.is_empty())
                                                 .map(str::to_string)
                                                 .collect();
                return Some((Arc::clone(&entry.resource), params));
            }

            if prefix == "/"
            {
                break;
            }
        }
        None
    }
}

/// One request as seen by a [`Resource`].
///
/// The content has already been read in full; [`read`](Self::read) pulls
/// from it. Responses go straight to the client's socket.
pub struct ResourceRequest
{
    client: Arc<Client>,
    sock: Arc<Socket>,
    pub head: RequestHead,
    pub params: Vec<String>,
    content: Bytes,
    read_pos: usize,
    started: bool,
}

impl ResourceRequest
{
    pub(crate) fn new(client: Arc<Client>, sock: Arc<Socket>, head: RequestHead, params: Vec<String>, content: Bytes) -> Self
    {
        Self {
            client,
            sock,
            head,
            params,
            content,
            read_pos: 0,
            started: false,
        }
    }

    pub fn client_id(&self) -> ConnectionId
    {
        self.client.id
    }

    pub fn remote(&self) -> &str
    {
        self.client.remote()
    }

    pub fn method(&self) -> &str
    {
        &self.head.method
    }

    pub fn path(&self) -> &str
    {
        &self.head.path
    }

    pub fn param(&self, index: usize) -> Option<&str>
    {
        self.params.get(index).map(String::as_str)
    }

    /// Fail with `405` unless the request used `method`
    pub fn require_method(&self, method: &str) -> Result<(), HttpError>
    {
        if self.head.method.eq_ignore_ascii_case(method)
        {
            Ok(())
        }
        else
        {
            Err(HttpError::new(Code::METHOD_NOT_ALLOWED, format!("{} not allowed here", self.head.method)))
        }
    }

    /// The whole request content
    pub fn content(&self) -> &[u8]
    {
        &self.content
    }

    /// The request content parsed as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError>
    {
        serde_json::from_slice(&self.content).map_err(|e| HttpError::bad_request(e.to_string()))
    }

    /// Copy the next unread content into `buf`, returning how much was copied
    pub fn read(&mut self, buf: &mut [u8]) -> usize
    {
        let remaining = &self.content[self.read_pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.read_pos += n;
        n
    }

    /// Whether any response bytes have been written
    pub fn started(&self) -> bool
    {
        self.started
    }

    /// Write raw response bytes
    pub async fn write(&mut self, bytes: &[u8]) -> Result<usize, ServeError>
    {
        self.started = true;
        self.client.mark_responding();
        Ok(self.sock.write_all(bytes).await?)
    }

    /// Write a complete response
    pub async fn respond(&mut self, response: Response) -> Result<(), ServeError>
    {
        if self.started
        {
            invariant_violation("second response to one request");
            return Ok(());
        }
        self.write(&response.to_bytes()).await?;
        Ok(())
    }
}
