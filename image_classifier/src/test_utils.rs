use crate::model_service::{ModelError, ModelService};
use axum::{
    http::{header, StatusCode},
    routing::get,
    Router,
};
use image::{DynamicImage, ImageBuffer, Rgb};
use ndarray::{Array2, Array4};
use std::{
    io::Cursor,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::net::TcpListener;

pub const LARGE_BODY_BYTES: usize = 64 * 1024;
/// `/slow` answers after this delay, longer than a one second fetch timeout.
pub const SLOW_RESPONSE_DELAY: Duration = Duration::from_secs(3);

pub fn png_bytes() -> Vec<u8> {
    let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_fn(320, 240, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut image_data: Vec<u8> = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut image_data), image::ImageFormat::Png)
        .unwrap();
    image_data
}

/// Serves fixture payloads on an ephemeral loopback port.
pub async fn spawn_fixture_server() -> SocketAddr {
    let router = Router::new()
        .route(
            "/cat.png",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], png_bytes()) }),
        )
        .route(
            "/page.html",
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "text/html")],
                    "<html><body>Not Found</body></html>",
                )
            }),
        )
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
        .route("/large", get(|| async { vec![0u8; LARGE_BODY_BYTES] }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(SLOW_RESPONSE_DELAY).await;
                png_bytes()
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// A loopback address with nothing listening on it.
pub async fn closed_local_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Returns fixed logits and counts forward passes.
#[derive(Clone)]
pub struct MockModelService {
    logits: Vec<f32>,
    calls: Arc<AtomicUsize>,
}

impl MockModelService {
    pub fn new(logits: Vec<f32>) -> Self {
        Self {
            logits,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ModelService for MockModelService {
    fn forward(&self, input: &Array4<f32>) -> Result<Array2<f32>, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if input.shape() != [1, 3, 224, 224] {
            return Err(ModelError::Inference(format!(
                "unexpected input shape {:?}",
                input.shape()
            )));
        }
        Array2::from_shape_vec((1, self.logits.len()), self.logits.clone())
            .map_err(|e| ModelError::Inference(e.to_string()))
    }
}
