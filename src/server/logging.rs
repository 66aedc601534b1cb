use std::{fmt, net::IpAddr, time::Duration};

use hyper::{header::USER_AGENT, Request, Response};

use super::onion::{Layer, Service};
use super::service::State;
use crate::counter::ConnectionCounter;

/// One access log line. `open` is the number of connections the server
/// still held when the response was ready, this one included.
struct AccessLog {
    ip: Option<IpAddr>,
    uuid: Option<uuid::Uuid>,
    request_line: String,
    user_agent: Option<String>,
    status: u16,
    elapsed: Duration,
    open: usize,
}

impl fmt::Display for AccessLog {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.ip {
            Some(ip) => write!(f, "{ip} ")?,
            None => write!(f, "- ")?,
        }
        write!(
            f,
            r#""{}" {} "{}" {}ms open={}"#,
            self.request_line,
            self.status,
            self.user_agent.as_deref().unwrap_or("-"),
            self.elapsed.as_millis(),
            self.open,
        )?;
        if let Some(uuid) = self.uuid {
            write!(f, " {uuid}")?;
        }
        Ok(())
    }
}

/// Logs every request with the server's open connection count at the time
/// its response was produced.
pub(super) struct AccessLogService<S> {
    inner: S,
    counter: ConnectionCounter,
}

impl<S> AccessLogService<S> {
    async fn observe<Body, ResBody>(
        &self,
        req: Request<Body>,
    ) -> Result<(Response<ResBody>, AccessLog), <S as Service<Request<Body>>>::Error>
    where
        S: Service<Request<Body>, Response = Response<ResBody>>,
    {
        let start = tokio::time::Instant::now();
        let state = req.extensions().get::<State>();
        let ip = state.map(|s| s.remote_addr);
        let uuid = state.map(|s| s.uuid);
        let request_line = format!("{} {} {:?}", req.method(), req.uri(), req.version());
        let user_agent = req
            .headers()
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let res = self.inner.call(req).await?;

        let log = AccessLog {
            ip,
            uuid,
            request_line,
            user_agent,
            status: res.status().as_u16(),
            elapsed: start.elapsed(),
            open: self.counter.count(),
        };
        Ok((res, log))
    }
}

impl<S, Body, ResBody> Service<Request<Body>> for AccessLogService<S>
where
    S: Service<Request<Body>, Response = Response<ResBody>> + Send + Sync,
{
    type Error = S::Error;
    type Response = Response<ResBody>;

    async fn call(&self, req: Request<Body>) -> Result<Self::Response, Self::Error> {
        let (res, log) = self.observe(req).await?;
        log::info!(target: "drain", "{log}");
        Ok(res)
    }
}

pub(super) struct AccessLogLayer {
    counter: ConnectionCounter,
}

impl AccessLogLayer {
    pub fn new(counter: ConnectionCounter) -> Self {
        Self { counter }
    }
}

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;
    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService {
            inner,
            counter: self.counter.clone(),
        }
    }
}
