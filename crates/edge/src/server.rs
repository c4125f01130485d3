//! Actix Web routes exposing the edge API.

use std::net::SocketAddr;

use actix_web::{HttpResponse, web};
use anyhow::{Context, Result};
use rebar_core::{
    http::{HttpServerHandle, spawn_http_server},
    telemetry,
    wire::{ConfigPatch, ErrorResponse, MessageResponse},
};

use crate::api::{CaptureAck, EdgeApi};

pub const BANNER: &str = "RebarVista API is running!";

/// Register every edge route. Handlers expect `web::Data<EdgeApi>`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index_route))
        .route("/api/status", web::get().to(status_handler))
        .route("/api/latest", web::get().to(latest_handler))
        .route("/api/latest_image", web::get().to(latest_image_handler))
        .route("/api/capture", web::post().to(capture_handler))
        .route("/api/config", web::get().to(get_config_handler))
        .route("/api/config", web::post().to(set_config_handler))
        .route("/api/preview/resume", web::post().to(resume_preview_handler))
        .route("/preview.jpg", web::get().to(preview_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

/// Bind `addr` and serve the edge API on a new thread.
pub fn spawn_api_server(api: EdgeApi, addr: SocketAddr) -> Result<HttpServerHandle> {
    spawn_http_server("edge-api-server", addr, move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(web::Data::new(api.clone()));
        configure(cfg);
    })
    .with_context(|| format!("failed to start edge API on {addr}"))
}

async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body(BANNER)
}

async fn status_handler(api: web::Data<EdgeApi>) -> HttpResponse {
    HttpResponse::Ok().json(api.status())
}

async fn latest_handler(api: web::Data<EdgeApi>) -> HttpResponse {
    HttpResponse::Ok().json(api.latest())
}

async fn latest_image_handler(api: web::Data<EdgeApi>) -> HttpResponse {
    match api.latest_image() {
        Some(image) => HttpResponse::Ok().json(image),
        None => HttpResponse::NotFound().json(ErrorResponse::new("No image available")),
    }
}

async fn capture_handler(api: web::Data<EdgeApi>) -> HttpResponse {
    match api.trigger_capture() {
        CaptureAck::Accepted => {
            HttpResponse::Ok().json(MessageResponse::new("Capture triggered successfully"))
        }
        CaptureAck::Unavailable(err) => {
            HttpResponse::ServiceUnavailable().json(ErrorResponse::new(err.to_string()))
        }
    }
}

async fn get_config_handler(api: web::Data<EdgeApi>) -> HttpResponse {
    HttpResponse::Ok().json(api.get_config())
}

async fn set_config_handler(
    api: web::Data<EdgeApi>,
    patch: web::Json<ConfigPatch>,
) -> HttpResponse {
    match api.set_config(&patch) {
        Ok(_) => HttpResponse::Ok().json(MessageResponse::new("Configuration updated")),
        Err(err) => HttpResponse::BadRequest().json(ErrorResponse::new(err.to_string())),
    }
}

/// Live camera frame; 204 while a run is active or a result is displayed.
async fn preview_handler(api: web::Data<EdgeApi>) -> HttpResponse {
    let api = api.into_inner();
    match web::block(move || api.preview_jpeg()).await {
        Ok(Some(jpeg)) => HttpResponse::Ok()
            .content_type("image/jpeg")
            .append_header(("Cache-Control", "no-cache"))
            .body(jpeg),
        Ok(None) => HttpResponse::NoContent().finish(),
        Err(err) => HttpResponse::InternalServerError().json(ErrorResponse::new(err.to_string())),
    }
}

async fn resume_preview_handler(api: web::Data<EdgeApi>) -> HttpResponse {
    api.resume_preview();
    HttpResponse::Ok().json(MessageResponse::new("Preview resumed"))
}

async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().json(ErrorResponse::new("metrics disabled")),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{
        App,
        http::{StatusCode, header},
        test,
    };
    use rebar_core::{
        ResultStore, Snapshot,
        http::cors_headers,
        wire::{ConfigView, ImageResponse, LatestResponse, StatusResponse},
    };
    use serde_json::json;

    use super::*;
    use crate::{
        controller::{
            CaptureController, WorkerHandle, spawn_capture_worker,
            tests::{FakeCamera, detecting_parts, fast_options},
        },
        settings::{DeviceConfig, DeviceSettings},
    };

    fn edge_api(
        camera: FakeCamera,
        store: Arc<ResultStore>,
    ) -> (EdgeApi, CaptureController, WorkerHandle) {
        let settings = Arc::new(DeviceSettings::in_memory(DeviceConfig::default()));
        let mut parts = detecting_parts(store.clone());
        parts.settings = settings.clone();
        let (controller, worker) = spawn_capture_worker(camera, parts, fast_options()).unwrap();
        (
            EdgeApi::new(controller.clone(), store, settings),
            controller,
            worker,
        )
    }

    macro_rules! service {
        ($api:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($api))
                    .wrap(cors_headers())
                    .configure(configure),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn status_and_latest_before_any_capture() {
        let (api, _, worker) = edge_api(FakeCamera::default(), Arc::new(ResultStore::new()));
        let app = service!(api);

        let req = test::TestRequest::get().uri("/api/status").to_request();
        let status: StatusResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status.status, "online");
        assert!(!status.has_results);

        let req = test::TestRequest::get().uri("/api/latest").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["timestamp"], serde_json::Value::Null);
        assert_eq!(body["segments"], json!([]));
        assert_eq!(body["total_volume"], 0.0);

        let req = test::TestRequest::get().uri("/api/latest_image").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "No image available");
        worker.stop();
    }

    #[actix_web::test]
    async fn published_snapshot_is_served() {
        let store = Arc::new(ResultStore::new());
        store.publish(Snapshot::new("20240101-090000-000", Vec::new(), Some(vec![1, 2, 3])));
        let (api, _, worker) = edge_api(FakeCamera::default(), store);
        let app = service!(api);

        let req = test::TestRequest::get().uri("/api/latest").to_request();
        let latest: LatestResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(latest.timestamp.as_deref(), Some("20240101-090000-000"));
        assert!(latest.image_available);

        let req = test::TestRequest::get().uri("/api/latest_image").to_request();
        let image: ImageResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(image.image, "AQID");
        worker.stop();
    }

    #[actix_web::test]
    async fn capture_is_refused_while_a_run_is_in_flight() {
        let camera = FakeCamera::default();
        let (release, gate) = crossbeam_channel::bounded::<()>(1);
        *camera.state.gate.lock().unwrap() = Some(gate);
        let (api, _, worker) = edge_api(camera.clone(), Arc::new(ResultStore::new()));
        let app = service!(api);

        let req = test::TestRequest::post().uri("/api/capture").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "Capture triggered successfully");

        let req = test::TestRequest::post().uri("/api/capture").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "capture already in progress");

        release.send(()).unwrap();
        drop(camera.state.gate.lock().unwrap().take());
        worker.stop();
    }

    #[actix_web::test]
    async fn config_round_trip_and_rejection() {
        let (api, _, worker) = edge_api(FakeCamera::default(), Arc::new(ResultStore::new()));
        let app = service!(api);

        let req = test::TestRequest::post()
            .uri("/api/config")
            .set_json(json!({"detection_threshold": 1.5}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/config")
            .set_json(json!({"detection_threshold": 0.55}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "Configuration updated");

        let req = test::TestRequest::get().uri("/api/config").to_request();
        let view: ConfigView = test::call_and_read_body_json(&app, req).await;
        assert_eq!(view.detection_threshold, 0.55);
        assert!(view.camera_enabled);
        assert_eq!(view.external_camera_index, 0);
        worker.stop();
    }

    #[actix_web::test]
    async fn preview_pauses_after_a_result_until_resumed() {
        let (api, controller, worker) =
            edge_api(FakeCamera::default(), Arc::new(ResultStore::new()));
        let app = service!(api);

        let req = test::TestRequest::get().uri("/preview.jpg").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );

        assert_eq!(controller.trigger_and_wait().unwrap().label(), "published");
        let req = test::TestRequest::get().uri("/preview.jpg").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::post().uri("/api/preview/resume").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        let req = test::TestRequest::get().uri("/preview.jpg").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        worker.stop();
    }

    #[actix_web::test]
    async fn banner_is_plain_text() {
        let (api, _, worker) = edge_api(FakeCamera::default(), Arc::new(ResultStore::new()));
        let app = service!(api);
        let req = test::TestRequest::get().uri("/").to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, BANNER.as_bytes());
        worker.stop();
    }
}
