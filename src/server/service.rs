use std::{net::IpAddr, time::Duration};

use chrono::{DateTime, Local};
use hyper::{
    header::{HeaderValue, CONTENT_TYPE},
    Method, Request, Response, StatusCode,
};

use super::onion::{Layer, Service};
use crate::{body::ResponseBody, error::ServerError};

pub(crate) const REQUEST_UUID_HEADER: &str = "request-uuid";

#[derive(Clone)]
pub(crate) struct State {
    pub uuid: uuid::Uuid,
    pub remote_addr: IpAddr,
}

impl State {
    #[inline(always)]
    fn new(remote_addr: IpAddr) -> State {
        let uuid = uuid::Uuid::now_v7();
        State { remote_addr, uuid }
    }
}

fn uuid_to_header_value(uuid: uuid::Uuid) -> HeaderValue {
    let mut buffer = [0u8; uuid::fmt::Hyphenated::LENGTH];
    HeaderValue::from_str(uuid.hyphenated().encode_lower(&mut buffer))
        .expect("Unable to convert from uuid to header value, this is a bug")
}

/// Attaches a fresh [`State`] to every request and echoes its id back in
/// the response headers.
pub(crate) struct AddStateService<S> {
    inner: S,
    remote_addr: IpAddr,
}

impl<S, ReqBody> Service<Request<ReqBody>> for AddStateService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResponseBody>, Error = ServerError>
        + Send
        + Sync,
{
    type Error = ServerError;
    type Response = Response<ResponseBody>;

    async fn call(&self, mut req: Request<ReqBody>) -> Result<Self::Response, Self::Error> {
        let state = State::new(self.remote_addr);
        let uuid = state.uuid;
        req.extensions_mut().insert(state);

        let mut res = match self.inner.call(req).await {
            Ok(res) => res,
            Err(e) => {
                log::error!(target: "drain", "Request {uuid} failed: {e}");
                e.into()
            }
        };
        res.headers_mut()
            .insert(REQUEST_UUID_HEADER, uuid_to_header_value(uuid));
        Ok(res)
    }
}

pub(crate) struct AddStateLayer {
    remote_addr: IpAddr,
}

impl AddStateLayer {
    #[inline]
    pub fn new(remote_addr: IpAddr) -> Self {
        Self { remote_addr }
    }
}

impl<S> Layer<S> for AddStateLayer {
    type Service = AddStateService<S>;
    fn layer(&self, inner: S) -> Self::Service {
        AddStateService {
            inner,
            remote_addr: self.remote_addr,
        }
    }
}

#[derive(serde::Serialize)]
#[serde(rename_all = "PascalCase")]
struct Timing {
    request_at: DateTime<Local>,
    response_at: DateTime<Local>,
}

/// Reads `delay` (whole seconds, 0 to 255) from a query string. Anything
/// that does not parse is logged and counts as no delay.
fn parse_delay(query: Option<&str>) -> u8 {
    let Some(query) = query else {
        return 0;
    };
    let Some((_, value)) = url::form_urlencoded::parse(query.as_bytes()).find(|(k, _)| k == "delay")
    else {
        return 0;
    };
    match value.parse() {
        Ok(delay) => delay,
        Err(e) => {
            log::error!(target: "drain", "Invalid delay {value:?}: {e}");
            0
        }
    }
}

/// `GET /?delay=N`: waits N seconds, then reports when the request arrived
/// and when the response was produced.
pub(crate) struct DelayService;

impl<ReqBody: Send> Service<Request<ReqBody>> for DelayService {
    type Error = ServerError;
    type Response = Response<ResponseBody>;

    async fn call(&self, req: Request<ReqBody>) -> Result<Self::Response, Self::Error> {
        // Only `GET /` is routed; any other method or path is unknown.
        if req.uri().path() != "/" || req.method() != Method::GET {
            return Ok(Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(ResponseBody::plain_text("404 page not found"))?);
        }

        let delay = parse_delay(req.uri().query());
        let request_at = Local::now();

        tokio::time::sleep(Duration::from_secs(delay.into())).await;

        let body = serde_json::to_vec(&Timing {
            request_at,
            response_at: Local::now(),
        })?;

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .body(ResponseBody::json(body))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(res: Response<ResponseBody>) -> serde_json::Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn delay_is_read_from_the_query() {
        assert_eq!(parse_delay(None), 0);
        assert_eq!(parse_delay(Some("")), 0);
        assert_eq!(parse_delay(Some("delay=3")), 3);
        assert_eq!(parse_delay(Some("foo=bar&delay=255")), 255);
    }

    #[test]
    fn invalid_delay_counts_as_zero() {
        assert_eq!(parse_delay(Some("delay=256")), 0);
        assert_eq!(parse_delay(Some("delay=-1")), 0);
        assert_eq!(parse_delay(Some("delay=soon")), 0);
    }

    #[tokio::test]
    async fn responds_with_timing() {
        let req = Request::get("/?delay=0").body(()).unwrap();
        let res = DelayService.call(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers()[CONTENT_TYPE],
            "application/json; charset=utf-8"
        );

        let json = body_json(res).await;
        let request_at: DateTime<Local> =
            serde_json::from_value(json["RequestAt"].clone()).unwrap();
        let response_at: DateTime<Local> =
            serde_json::from_value(json["ResponseAt"].clone()).unwrap();
        assert!(request_at <= response_at);
    }

    #[tokio::test]
    async fn waits_for_the_requested_delay() {
        let req = Request::get("/?delay=1").body(()).unwrap();
        let start = std::time::Instant::now();
        let res = DelayService.call(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let req = Request::get("/health").body(()).unwrap();
        let res = DelayService.call(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn other_methods_are_not_found() {
        for req in [
            Request::post("/?delay=1").body(()).unwrap(),
            Request::delete("/").body(()).unwrap(),
        ] {
            let res = DelayService.call(req).await.unwrap();
            assert_eq!(res.status(), StatusCode::NOT_FOUND);
            assert!(!res.headers().contains_key(hyper::header::ALLOW));
            let bytes = res.into_body().collect().await.unwrap().to_bytes();
            assert_eq!(&bytes[..], b"404 page not found");
        }
    }

    #[tokio::test]
    async fn state_is_attached_and_echoed() {
        struct Echo;

        impl Service<Request<()>> for Echo {
            type Error = ServerError;
            type Response = Response<ResponseBody>;
            async fn call(&self, req: Request<()>) -> Result<Self::Response, Self::Error> {
                let state = req.extensions().get::<State>().expect("State not found");
                Ok(Response::new(ResponseBody::plain_text(
                    state.remote_addr.to_string(),
                )))
            }
        }

        let service = AddStateLayer::new(IpAddr::V4([10, 0, 0, 7].into())).layer(Echo);
        let res = service.call(Request::new(())).await.unwrap();

        let uuid = res.headers()[REQUEST_UUID_HEADER].to_str().unwrap();
        assert!(uuid::Uuid::parse_str(uuid).is_ok());
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"10.0.0.7");
    }

    #[tokio::test]
    async fn inner_errors_become_server_errors() {
        struct Failing;

        impl Service<Request<()>> for Failing {
            type Error = ServerError;
            type Response = Response<ResponseBody>;
            async fn call(&self, _: Request<()>) -> Result<Self::Response, Self::Error> {
                Err(ServerError::MissingArgument("nothing"))
            }
        }

        let service = AddStateLayer::new(IpAddr::V4([127, 0, 0, 1].into())).layer(Failing);
        let res = service.call(Request::new(())).await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(res.headers().contains_key(REQUEST_UUID_HEADER));
    }
}
