use std::time::Duration;

use rampr_http::{Error, HttpClient, HttpRequest, HttpTransport};
use rampr_testserver::TestServer;

#[tokio::test]
async fn get_reports_status_body_timings_and_bytes() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let client = HttpClient::default();

    let res = client
        .request(HttpRequest::get(server.urls().slow_with_delay(30)))
        .await?;

    anyhow::ensure!(res.status == 200, "status={}", res.status);
    anyhow::ensure!(
        res.body_utf8()
            .is_some_and(|b| b.contains("Slow response completed")),
        "unexpected body: {:?}",
        res.body_utf8()
    );
    anyhow::ensure!(res.timings.waiting >= Duration::from_millis(30));
    anyhow::ensure!(res.timings.duration >= res.timings.waiting);
    anyhow::ensure!(res.bytes_sent > 0 && res.bytes_received as usize > res.body.len());
    anyhow::ensure!(res.header("content-type") == Some("application/json"));
    anyhow::ensure!(server.stats().slow_calls() == 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn post_json_round_trips_through_data_endpoint() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let client = HttpClient::default();

    let req = HttpRequest::post(server.urls().data.clone(), r#"{"a":1,"b":2}"#)
        .with_header("content-type", "application/json");
    let res = client.request(req).await?;

    anyhow::ensure!(res.status == 200, "status={}", res.status);
    anyhow::ensure!(
        res.body_utf8()
            .is_some_and(|b| b.contains("\"inputSize\":2")),
        "unexpected body: {:?}",
        res.body_utf8()
    );

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn per_request_timeout_is_enforced() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let client = HttpClient::default();

    let req = HttpRequest::get(server.urls().slow_with_delay(500))
        .with_timeout(Duration::from_millis(50));
    match client.request(req).await {
        Err(Error::Timeout(limit)) => anyhow::ensure!(limit == Duration::from_millis(50)),
        other => anyhow::bail!("expected timeout, got {other:?}"),
    }

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn default_timeout_applies_unless_the_request_sets_one() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let client = HttpClient::default().with_default_timeout(Some(Duration::from_millis(50)));

    match client
        .request(HttpRequest::get(server.urls().slow_with_delay(500)))
        .await
    {
        Err(Error::Timeout(limit)) => anyhow::ensure!(limit == Duration::from_millis(50)),
        other => anyhow::bail!("expected timeout, got {other:?}"),
    }

    let res = client
        .request(
            HttpRequest::get(server.urls().slow_with_delay(100)).with_timeout(Duration::from_secs(5)),
        )
        .await?;
    anyhow::ensure!(res.status == 200, "status={}", res.status);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn error_statuses_are_responses_not_errors() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let client = HttpClient::default();

    let res = client
        .request(HttpRequest::get(server.urls().status(503)))
        .await?;
    anyhow::ensure!(res.status == 503);
    anyhow::ensure!(!res.is_success());

    server.shutdown().await;
    Ok(())
}
