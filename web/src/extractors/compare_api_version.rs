use crate::extractors::RejectionType;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use log::*;
use service::config::ApiVersion;

/// Rejects requests whose `x-version` header names an API version this server does not serve.
/// A missing header means the default version.
pub(crate) struct CompareApiVersion(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for CompareApiVersion
where
    S: Send + Sync,
{
    type Rejection = RejectionType;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let requested = match parts.headers.get(ApiVersion::field_name()) {
            Some(value) => value
                .to_str()
                .map_err(|_| {
                    (
                        StatusCode::BAD_REQUEST,
                        format!("{} header is not valid text", ApiVersion::field_name()),
                    )
                })?
                .to_string(),
            None => return Ok(CompareApiVersion(ApiVersion::default_version().to_string())),
        };

        if ApiVersion::versions().contains(&requested.as_str()) {
            Ok(CompareApiVersion(requested))
        } else {
            debug!("Rejecting request for unsupported API version {requested}");
            Err((
                StatusCode::BAD_REQUEST,
                format!("API version {requested} is not supported"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(version: Option<&str>) -> Result<CompareApiVersion, RejectionType> {
        let mut builder = Request::builder().uri("/recordings");
        if let Some(version) = version {
            builder = builder.header(ApiVersion::field_name(), version);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        CompareApiVersion::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn missing_header_uses_default_version() {
        let CompareApiVersion(version) = extract(None).await.unwrap();
        assert_eq!(version, ApiVersion::default_version());
    }

    #[tokio::test]
    async fn unknown_version_is_rejected() {
        let (status, _) = extract(Some("9.9.9")).await.err().unwrap();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
