use rocket::http::{Header, Method, Status};
use rocket::local::asynchronous::Client;
use rocket::{get, routes};
use serde_json::Value;

use svc_toolkit::config::{CorsConfig, LimiterConfig, ServerConfig};
use svc_toolkit::cors::build_cors;
use svc_toolkit::{ClientLimiter, RateLimit, WebApp};

#[get("/boom")]
fn boom() -> &'static str {
	panic!("handler blew up")
}

async fn client() -> Client {
	let app = WebApp::new(ServerConfig::default());
	let rocket = app.build(None, None).unwrap().mount("/", routes![boom]);
	Client::tracked(rocket).await.unwrap()
}

async fn json(resp: rocket::local::asynchronous::LocalResponse<'_>) -> Value {
	serde_json::from_str(&resp.into_string().await.unwrap()).unwrap()
}

#[rocket::async_test]
async fn health_reports_availability() {
	let client = client().await;
	let resp = client.get("/health").dispatch().await;
	assert_eq!(resp.status(), Status::Ok);
	let body = json(resp).await;
	assert_eq!(body["status"], "success");
	assert_eq!(body["data"]["status"], "available");
	assert_eq!(body["data"]["system_info"]["environment"], "development");
	assert!(body["data"]["system_info"]["version"].is_string());
	assert!(body["data"]["system_info"]["uptime"].is_string());
}

#[rocket::async_test]
async fn debug_exposes_request_counters() {
	let client = client().await;
	assert_eq!(client.get("/health").dispatch().await.status(), Status::Ok);

	let body = json(client.get("/debug").dispatch().await).await;
	assert!(body["total_requests_received"].as_u64().unwrap() >= 2);
	assert!(body["total_responses_sent"].as_u64().unwrap() >= 1);
	assert!(body["total_responses_by_status"]["200"].as_u64().unwrap() >= 1);
}

#[rocket::async_test]
async fn unknown_routes_get_a_jsend_fail() {
	let client = client().await;
	let resp = client.get("/nope").dispatch().await;
	assert_eq!(resp.status(), Status::NotFound);
	let body = json(resp).await;
	assert_eq!(body["status"], "fail");
	assert_eq!(body["data"]["error"], "The requested resource could not be found");
}

#[rocket::async_test]
async fn panics_become_jsend_errors_and_close_the_connection() {
	let client = client().await;
	let resp = client.get("/boom").dispatch().await;
	assert_eq!(resp.status(), Status::InternalServerError);
	assert_eq!(resp.headers().get_one("Connection"), Some("close"));
	let body = json(resp).await;
	assert_eq!(body["status"], "error");
	assert_eq!(body["message"], "The server encountered a problem and could not process your request");
}

#[rocket::async_test]
async fn base_routes_are_rate_limited_when_a_limiter_is_given() {
	let app = WebApp::new(ServerConfig::default());
	let limit = RateLimit::new(ClientLimiter::new(&LimiterConfig::new(0.001, 2, true)).unwrap());
	let client = Client::tracked(app.build(Some(&limit), None).unwrap()).await.unwrap();

	let get = || client.get("/health").header(Header::new("X-Real-IP", "9.9.9.9"));
	assert_eq!(get().dispatch().await.status(), Status::Ok);
	assert_eq!(get().dispatch().await.status(), Status::Ok);
	let resp = get().dispatch().await;
	assert_eq!(resp.status(), Status::TooManyRequests);
	assert_eq!(json(resp).await["data"]["error"], "Rate limit exceeded");
}

#[rocket::async_test]
async fn trusted_origins_get_cors_headers() {
	let cors = build_cors(&CorsConfig {
		allow_methods: vec![],
		trusted_origins: vec!["https://app.example.com".into()],
	})
	.unwrap();
	let app = WebApp::new(ServerConfig::default());
	let client = Client::tracked(app.build(None, Some(cors)).unwrap()).await.unwrap();

	let resp = client
		.get("/health")
		.header(Header::new("Origin", "https://app.example.com"))
		.dispatch()
		.await;
	assert_eq!(resp.status(), Status::Ok);
	assert_eq!(resp.headers().get_one("Access-Control-Allow-Origin"), Some("https://app.example.com"));

	let resp = client
		.req(Method::Options, "/health")
		.header(Header::new("Origin", "https://app.example.com"))
		.header(Header::new("Access-Control-Request-Method", "PUT"))
		.dispatch()
		.await;
	assert!(resp.status().class().is_success());
	let allowed = resp.headers().get_one("Access-Control-Allow-Methods").unwrap_or_default();
	assert!(allowed.contains("PUT"));
}

#[rocket::async_test]
async fn untrusted_origins_pass_through_without_cors_headers() {
	let cors = build_cors(&CorsConfig {
		allow_methods: vec![],
		trusted_origins: vec!["https://app.example.com".into()],
	})
	.unwrap();
	let app = WebApp::new(ServerConfig::default());
	let client = Client::tracked(app.build(None, Some(cors)).unwrap()).await.unwrap();

	let resp = client
		.get("/health")
		.header(Header::new("Origin", "https://evil.example.com"))
		.dispatch()
		.await;
	assert_eq!(resp.status(), Status::Ok);
	assert_eq!(resp.headers().get_one("Access-Control-Allow-Origin"), None);
	assert_eq!(json(resp).await["status"], "success");
}
