//! HTTP surface: the start page and the build/continue endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::multipart::MultipartError;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};

use crate::dispatcher::{BuildRequest, BuildSource, ClientInfo, Dispatcher, RequestOrigin};
use crate::pages;
use crate::params::RawParameters;

/// Room in the request body for form fields and multipart framing.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub max_upload_bytes: usize,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes.saturating_add(FORM_OVERHEAD_BYTES);
    Router::new()
        .route("/", get(start_handler))
        .route("/index", get(start_handler))
        .route("/btree", post(btree_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn start_handler(
    State(state): State<AppState>,
    ConnectInfo(address): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Html<String> {
    state
        .dispatcher
        .record_start_view(&client_info(&headers, address));
    Html(pages::start_page(state.max_upload_bytes))
}

async fn btree_handler(
    State(state): State<AppState>,
    ConnectInfo(address): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let fields = match FormFields::collect(&mut multipart).await {
        Ok(fields) => fields,
        Err(e) => {
            tracing::warn!("failed to read form from {address}: {e}");
            let body = pages::error_page(
                "The form could not be read. The upload may be too large.",
            );
            return (StatusCode::BAD_REQUEST, Html(body)).into_response();
        }
    };

    let referer = headers
        .get(header::REFERER)
        .and_then(|value| value.to_str().ok());
    let request = fields.into_request(referer, client_info(&headers, address));

    match state.dispatcher.handle(request).await {
        Ok(visualization) => Html(pages::result_page(&visualization)).into_response(),
        Err(e) => e.into_response(),
    }
}

fn client_info(headers: &HeaderMap, address: SocketAddr) -> ClientInfo {
    ClientInfo {
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        address: address.ip().to_string(),
    }
}

/// Fields of the start and continue forms, as submitted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormFields {
    pub from: Option<String>,
    pub token: Option<String>,
    pub btn: Option<String>,
    pub lns: Option<String>,
    pub fan: Option<String>,
    pub blm: Option<String>,
    pub ins: Option<String>,
    pub sfile: Option<String>,
    /// File name and contents of `ufile`.
    pub ufile: Option<(String, Vec<u8>)>,
}

impl FormFields {
    /// Read every field of a multipart form. Unknown fields are skipped.
    ///
    /// # Errors
    ///
    /// Returns the multipart error if the body is malformed or too large.
    pub async fn collect(multipart: &mut Multipart) -> Result<Self, MultipartError> {
        let mut fields = Self::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "ufile" {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await?;
                // Browsers send an empty, unnamed part when no file was chosen.
                if !file_name.is_empty() || !bytes.is_empty() {
                    fields.ufile = Some((file_name, bytes.to_vec()));
                }
                continue;
            }

            let slot = match name.as_str() {
                "from" => &mut fields.from,
                "token" => &mut fields.token,
                "btn" => &mut fields.btn,
                "lns" => &mut fields.lns,
                "fan" => &mut fields.fan,
                "blm" => &mut fields.blm,
                "ins" => &mut fields.ins,
                "sfile" => &mut fields.sfile,
                _ => continue,
            };
            *slot = Some(field.text().await?);
        }

        Ok(fields)
    }

    /// Turn the submitted fields into an untrusted dispatcher request.
    #[must_use]
    pub fn into_request(self, referer: Option<&str>, client: ClientInfo) -> BuildRequest {
        let origin = RequestOrigin::resolve(self.from.as_deref(), referer);
        let declared_origin = self
            .from
            .clone()
            .or_else(|| referer.map(String::from))
            .unwrap_or_default();

        let source = match (self.ufile, self.sfile) {
            (Some((file_name, bytes)), _) => Some(BuildSource::Upload { file_name, bytes }),
            (None, Some(sample)) if !sample.trim().is_empty() => Some(BuildSource::Sample(sample)),
            (None, _) => None,
        };

        BuildRequest {
            origin,
            declared_origin,
            declared_session_id: self.btn,
            session_token: self.token,
            parameters: RawParameters {
                leaf_size: self.lns,
                fanout: self.fan,
                build_mode: self.blm,
            },
            insert: self.ins,
            source,
            client,
        }
    }
}
