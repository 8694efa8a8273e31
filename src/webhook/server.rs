use crate::config::settings::{Settings, Tls};
use crate::webhook::swapper::ImageSwapper;
use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use k8s_openapi::api::core::v1::Pod;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use rustls::ServerConfig;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
struct AppState {
    swapper: Arc<ImageSwapper>,
    dry_run: bool,
}

/// Serve the admission webhook until the process is stopped.
pub async fn serve(swapper: Arc<ImageSwapper>, settings: &Settings) {
    let state = AppState {
        swapper,
        dry_run: settings.dry_run,
    };
    let app = Router::new()
        .route("/mutate", post(mutate_handler))
        .route("/health", get(health_handler))
        .with_state(state);
    let addr: SocketAddr = settings
        .listen_address
        .parse()
        .expect("invalid listen_address");
    let listener = TcpListener::bind(addr)
        .await
        .expect("cannot bind listen_address");
    match &settings.tls {
        Some(tls) => {
            info!(%addr, "Admission webhook listening");
            serve_tls(listener, app, tls).await;
        }
        None => {
            // The API server requires TLS; plain HTTP is for local testing only.
            warn!(%addr, "No TLS material configured, serving plain HTTP");
            axum::serve(listener, app).await.expect("webhook server failed");
        }
    }
}

async fn serve_tls(listener: TcpListener, app: Router, tls: &Tls) {
    // rustls wants exactly one process-level crypto provider before any
    // config is built.
    let _ = rustls::crypto::ring::default_provider().install_default();
    let acceptor = TlsAcceptor::from(Arc::new(tls_config(tls)));
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(connection) => connection,
            Err(e) => {
                error!(error = %e, "Accept failed");
                continue;
            }
        };
        let acceptor = acceptor.clone();
        let app = app.clone();
        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
            };
            let service = TowerToHyperService::new(app);
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(%peer, error = %e, "Connection closed with error");
            }
        });
    }
}

fn tls_config(tls: &Tls) -> ServerConfig {
    let cert_file = File::open(&tls.cert_file).expect("cannot open tls.cert_file");
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .expect("invalid certificate file");
    let key_file = File::open(&tls.key_file).expect("cannot open tls.key_file");
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .expect("invalid key file")
        .expect("no private key in tls.key_file");
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .expect("invalid TLS material");
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    config
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Admissions always succeed: the response is at worst the unmutated Pod.
async fn mutate_handler(
    State(state): State<AppState>,
    Json(review): Json<AdmissionReview<Pod>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<Pod> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Malformed admission review");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    let response = AdmissionResponse::from(&request);
    let Some(original) = request.object.clone() else {
        return Json(response.into_review());
    };
    let mutated = state.swapper.mutate(&request, original.clone()).await;
    if state.dry_run {
        debug!("Dry run enabled, emitting no patch");
        return Json(response.into_review());
    }
    let response = match admission_patch(&original, &mutated) {
        Ok(Some(patch)) => match response.with_patch(patch) {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Unable to serialize admission patch");
                AdmissionResponse::from(&request)
            }
        },
        Ok(None) => response,
        Err(e) => {
            error!(error = %e, "Unable to compute admission patch");
            response
        }
    };
    Json(response.into_review())
}

fn admission_patch(
    original: &Pod,
    mutated: &Pod,
) -> Result<Option<json_patch::Patch>, serde_json::Error> {
    let before = serde_json::to_value(original)?;
    let after = serde_json::to_value(mutated)?;
    let patch = json_patch::diff(&before, &after);
    Ok((!patch.0.is_empty()).then_some(patch))
}
