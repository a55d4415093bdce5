//! Small constructors for the responses filters produce most often.

use std::io::{self, BufWriter, Write};

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderValue, InvalidHeaderValue};
use http::StatusCode;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::error;

use crate::body::Body;
use crate::error::BoxError;
use crate::request::Response;

/// A `text/plain` response.
pub fn text(status: StatusCode, body: impl Into<Body>) -> Response {
    let mut res = Response::new(body.into());
    *res.status_mut() = status;
    res.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    res
}

pub fn not_found() -> Response {
    text(StatusCode::NOT_FOUND, "Not Found")
}

/// Encodes `value` as a JSON document followed by a newline.
///
/// `Content-Type: application/json` is added unless `headers` already
/// carries a content type.
pub fn json<T: Serialize + ?Sized>(
    status: StatusCode,
    headers: HeaderMap,
    value: &T,
) -> Result<Response, serde_json::Error> {
    let mut buf = serde_json::to_vec(value)?;
    buf.push(b'\n');
    Ok(with_json_headers(status, headers, Body::from(buf)))
}

/// Like [`json`], but the document is encoded on a blocking thread and
/// streamed to the client as it is produced, so the body length is unknown
/// and HTTP/1.1 clients see a chunked transfer.
///
/// An encoding failure cannot change a status that is already on the wire;
/// it is logged and the body is aborted.
pub fn streaming_json<T>(status: StatusCode, headers: HeaderMap, value: T) -> Response
where
    T: Serialize + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<Bytes, BoxError>>(8);

    tokio::task::spawn_blocking(move || {
        let mut out = BufWriter::new(ChannelWriter { tx: tx.clone() });
        let encoded = serde_json::to_writer(&mut out, &value)
            .map_err(io::Error::from)
            .and_then(|()| out.write_all(b"\n"))
            .and_then(|()| out.flush());
        if let Err(e) = encoded {
            error!(error = %e, "encoding streamed json");
            let _ = tx.blocking_send(Err(Box::new(e)));
        }
    });

    with_json_headers(status, headers, Body::Channel(rx))
}

/// A `302 Found` pointing at `location`.
pub fn redirect(location: &str) -> Result<Response, InvalidHeaderValue> {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = StatusCode::FOUND;
    res.headers_mut().insert(header::LOCATION, HeaderValue::from_str(location)?);
    Ok(res)
}

fn with_json_headers(status: StatusCode, mut headers: HeaderMap, body: Body) -> Response {
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    let mut res = Response::new(body);
    *res.status_mut() = status;
    *res.headers_mut() = headers;
    res
}

/// Blocking writer feeding a [`Body::Channel`].
struct ChannelWriter {
    tx: mpsc::Sender<Result<Bytes, BoxError>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use http_body_util::BodyExt;
    use serde::ser::Error as _;
    use serde::Serializer;

    use super::*;

    #[tokio::test]
    async fn json_sets_content_type_and_trailing_newline() {
        let res = json(StatusCode::OK, HeaderMap::new(), &BTreeMap::from([("ok", true)])).unwrap();
        assert_eq!(res.headers()[header::CONTENT_TYPE], "application/json");
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "{\"ok\":true}\n");
    }

    #[test]
    fn json_keeps_an_explicit_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/vnd.api+json"));
        let res = json(StatusCode::CREATED, headers, &[1, 2, 3]).unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(res.headers()[header::CONTENT_TYPE], "application/vnd.api+json");
    }

    #[tokio::test]
    async fn streaming_json_produces_the_same_document() {
        let rows: Vec<u32> = (0..2000).collect();
        let expected = json(StatusCode::OK, HeaderMap::new(), &rows).unwrap();
        let expected = expected.into_body().collect().await.unwrap().to_bytes();

        let res = streaming_json(StatusCode::OK, HeaderMap::new(), rows);
        assert_eq!(res.headers()[header::CONTENT_TYPE], "application/json");
        let streamed = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(streamed, expected);
    }

    struct Broken;

    impl Serialize for Broken {
        fn serialize<S: Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("cannot encode"))
        }
    }

    #[tokio::test]
    async fn streaming_json_aborts_on_encode_failure() {
        let res = streaming_json(StatusCode::OK, HeaderMap::new(), Broken);
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.into_body().collect().await.is_err());
    }

    #[test]
    fn redirect_sets_location() {
        let res = redirect("https://example.com/next").unwrap();
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(res.headers()[header::LOCATION], "https://example.com/next");
        assert!(redirect("bad\nvalue").is_err());
    }
}
