use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use trafficgen::{
    config::StartRequest,
    controller::{Controller, Status},
};
use warp::Filter;

#[derive(Debug, Default)]
struct Gauge {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    hits: AtomicUsize,
}

fn serve(gauge: Arc<Gauge>) -> SocketAddr {
    let route = warp::any().and_then(move || {
        let gauge = Arc::clone(&gauge);
        async move {
            let now = gauge.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            gauge.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            gauge.in_flight.fetch_sub(1, Ordering::SeqCst);
            gauge.hits.fetch_add(1, Ordering::SeqCst);
            Ok::<_, warp::Rejection>(warp::reply())
        }
    });
    let (addr, serve_fut) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(serve_fut);
    addr
}

fn request(addr: SocketAddr, sim_users: u32) -> StartRequest {
    StartRequest::from_yaml_str(&format!(
        r#"
config:
  Traffic Generator URL: "http://{addr}"
  XFF Header Name: X-Forwarded-For
  Rate Limit: 1
  Simulated Users: {sim_users}
  Minimum Session Length: 1
  Maximum Session Length: 2
  stop_timeout_seconds: 3
sitemap:
  has_auth: false
  paths:
    - method: GET
      paths: ["/", "/products/@id"]
      traffic_type: web
    - method: POST
      paths: ["/cart"]
      body: '{{"item": "@id"}}'
      traffic_type: api
  variables:
    id:
      type: range
      value: [1, 1000]
"#
    ))
    .expect("valid request")
}

async fn admits_one_request_at_a_time(sim_users: u32) {
    let gauge = Arc::new(Gauge::default());
    let addr = serve(Arc::clone(&gauge));

    let controller = Controller::new();
    controller
        .start(request(addr, sim_users))
        .await
        .expect("generation starts");
    assert_eq!(controller.status(), Status::Running);

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    controller.stop().await.expect("generation stops");

    assert_eq!(controller.status(), Status::Idle);
    assert!(gauge.hits.load(Ordering::SeqCst) > 0);
    assert_eq!(gauge.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(controller.current_rps().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn single_user_single_permit() {
    admits_one_request_at_a_time(1).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn many_users_share_one_permit() {
    admits_one_request_at_a_time(4).await;
}
