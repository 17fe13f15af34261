//! Remote resource retrieval.

use artbox_shared::{ArtboxError, ArtboxResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Retrieves the complete body of a URL.
///
/// No retries: a transport error or non-2xx status is returned as
/// [`ArtboxError::Fetch`] immediately.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// `trust_anchors` are PEM files to trust in addition to the system roots.
    async fn fetch(&self, url: &str, trust_anchors: &[PathBuf]) -> ArtboxResult<Vec<u8>>;
}

/// `http(s)://` via reqwest, `file://` from the local filesystem.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    user_agent: String,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            user_agent: format!("artbox/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    fn client(&self, trust_anchors: &[PathBuf]) -> ArtboxResult<reqwest::Client> {
        let mut builder = reqwest::Client::builder().user_agent(&self.user_agent);
        for anchor in trust_anchors {
            for cert in anchor_certificates(anchor)? {
                builder = builder.add_root_certificate(cert);
            }
        }
        builder
            .build()
            .map_err(|e| ArtboxError::Fetch(format!("Failed to build HTTP client: {}", e)))
    }
}

/// Every certificate in a PEM anchor file; bundles hold more than one.
fn anchor_certificates(anchor: &Path) -> ArtboxResult<Vec<reqwest::Certificate>> {
    let pem = std::fs::read(anchor).map_err(|e| {
        ArtboxError::Trust(format!(
            "Failed to read trust anchor {}: {}",
            anchor.display(),
            e
        ))
    })?;
    let certs = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
        ArtboxError::Trust(format!("Invalid trust anchor {}: {}", anchor.display(), e))
    })?;
    if certs.is_empty() {
        return Err(ArtboxError::Trust(format!(
            "Trust anchor {} holds no certificate",
            anchor.display()
        )));
    }
    Ok(certs)
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, trust_anchors: &[PathBuf]) -> ArtboxResult<Vec<u8>> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| ArtboxError::Fetch(format!("Invalid URL '{}': {}", url, e)))?;

        if parsed.scheme() == "file" {
            let path = parsed
                .to_file_path()
                .map_err(|_| ArtboxError::Fetch(format!("Invalid file URL '{}'", url)))?;
            return tokio::fs::read(&path)
                .await
                .map_err(|e| ArtboxError::Fetch(format!("Failed to read {}: {}", path.display(), e)));
        }

        tracing::info!(url = %url, "Fetching resource");
        let client = self.client(trust_anchors)?;
        let response = client
            .get(parsed)
            .send()
            .await
            .map_err(|e| ArtboxError::Fetch(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArtboxError::Fetch(format!("GET {} returned {}", url, status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ArtboxError::Fetch(format!("Failed to read body of {}: {}", url, e)))?;
        tracing::debug!(url = %url, bytes = body.len(), "Fetched resource");
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const ROOT_PEM: &str = "-----BEGIN CERTIFICATE-----
MIIBjTCCATOgAwIBAgIUDYcBoCWVmzQyTb69ldYzAUaGAGYwCgYIKoZIzj0EAwIw
GzEZMBcGA1UEAwwQYXJ0Ym94LXRlc3Qtcm9vdDAgFw0yNjEwMTkwOTQ0NDBaGA8y
MTI2MDkyNTA5NDQ0MFowGzEZMBcGA1UEAwwQYXJ0Ym94LXRlc3Qtcm9vdDBZMBMG
ByqGSM49AgEGCCqGSM49AwEHA0IABKFQ1Dbmtq/Ah6uO7PXSVk64UO1E7QsebSn2
h7GVfeNCvqQEY0CuQDbpTT6bfWB+OqpczQTE8vGktJAAz/9ZfUyjUzBRMB0GA1Ud
DgQWBBScaODVpTdd9FVcu4qGbyVykoezzzAfBgNVHSMEGDAWgBScaODVpTdd9FVc
u4qGbyVykoezzzAPBgNVHRMBAf8EBTADAQH/MAoGCCqGSM49BAMCA0gAMEUCIQD9
DXwA2lR7kDJlb/REfVToTEg2bTPR5h6h/K9XBxwznwIgKQPXRIPVmfNMU+E+Q/2s
Bp9dsYHMUYsWlL4zsok5gDk=
-----END CERTIFICATE-----
";

    const INTERMEDIATE_PEM: &str = "-----BEGIN CERTIFICATE-----
MIIBnjCCAUOgAwIBAgIUIHFNIzZV/WQ/ojcKO4mO8OhUj0UwCgYIKoZIzj0EAwIw
IzEhMB8GA1UEAwwYYXJ0Ym94LXRlc3QtaW50ZXJtZWRpYXRlMCAXDTI2MTAxOTA5
NDQ0MFoYDzIxMjYwOTI1MDk0NDQwWjAjMSEwHwYDVQQDDBhhcnRib3gtdGVzdC1p
bnRlcm1lZGlhdGUwWTATBgcqhkjOPQIBBggqhkjOPQMBBwNCAARH81OcYgrWIEZJ
4yWxnHqbzBZnNycKUXQNXnkVlFMXRhRfjgWnnGB8Jrdh8M7aYpn4LuutQC+iJGnd
VWP4L+KJo1MwUTAdBgNVHQ4EFgQUBLaorsKdE5yFI5aSjLcppuzHnkswHwYDVR0j
BBgwFoAUBLaorsKdE5yFI5aSjLcppuzHnkswDwYDVR0TAQH/BAUwAwEB/zAKBggq
hkjOPQQDAgNJADBGAiEAyUjko9iLkndEXZtRD8sSNLHw7OiuFfqYgusFAC/kdVkC
IQClFNLcdVlMbTCq5D2ZWxPQpRNy8yFuenDBe7LsSjPrQA==
-----END CERTIFICATE-----
";

    /// Serves one canned HTTP response on a local port.
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{}/toolC.tar.gz", addr)
    }

    #[test]
    fn test_anchor_bundle_yields_every_certificate() {
        let dir = tempfile::TempDir::new().unwrap();
        let bundle = dir.path().join("bundle.pem");
        std::fs::write(&bundle, format!("{}{}", ROOT_PEM, INTERMEDIATE_PEM)).unwrap();
        assert_eq!(anchor_certificates(&bundle).unwrap().len(), 2);

        let empty = dir.path().join("empty.pem");
        std::fs::write(&empty, "").unwrap();
        assert!(matches!(anchor_certificates(&empty), Err(ArtboxError::Trust(_))));

        assert!(HttpFetcher::new().client(&[bundle]).is_ok());
    }

    #[tokio::test]
    async fn test_not_found_is_fetch_error() {
        let url = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let err = HttpFetcher::new().fetch(&url, &[]).await.unwrap_err();
        match err {
            ArtboxError::Fetch(msg) => assert!(msg.contains("404"), "{}", msg),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_success_returns_body() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nbytes",
        )
        .await;
        let body = HttpFetcher::new().fetch(&url, &[]).await.unwrap();
        assert_eq!(body, b"bytes");
    }

    #[tokio::test]
    async fn test_refused_connection_is_fetch_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = HttpFetcher::new()
            .fetch(&format!("http://{}/toolC.tar.gz", addr), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ArtboxError::Fetch(_)));
    }

    #[tokio::test]
    async fn test_file_urls_are_read_locally() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"bytes").unwrap();
        let url = reqwest::Url::from_file_path(&path).unwrap();

        let body = HttpFetcher::new().fetch(url.as_str(), &[]).await.unwrap();
        assert_eq!(body, b"bytes");
    }

    #[tokio::test]
    async fn test_missing_file_is_fetch_error() {
        let err = HttpFetcher::new()
            .fetch("file:///nonexistent/artbox/payload", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ArtboxError::Fetch(_)));
    }

    #[tokio::test]
    async fn test_malformed_url_is_fetch_error() {
        let err = HttpFetcher::new().fetch("not a url", &[]).await.unwrap_err();
        assert!(matches!(err, ArtboxError::Fetch(_)));
    }
}
