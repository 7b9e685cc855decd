use crate::server::tests::post_json;
use crate::server::{make_router, SEND_PATH};
use crate::test_utils::{custody_address_for_tests, utxo, TestBridge};
use crate::validator::CallerAllowList;
use axum::http::StatusCode;
use std::net::{IpAddr, Ipv4Addr};

const COORDINATOR_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 100));

async fn send(bridge: &TestBridge) -> (StatusCode, serde_json::Value) {
    post_json(
        make_router(bridge.orchestrator.clone()),
        SEND_PATH,
        serde_json::json!({
            "to": custody_address_for_tests().to_string(),
            "amount": 10_000,
        }),
    )
    .await
}

#[tokio::test]
async fn members_refuse_unlisted_callers() {
    let bridge = TestBridge::new(2).await;
    bridge.wallet.fund(vec![utxo(1, 50_000)]).await;
    bridge
        .signers
        .set_allow_list(
            CallerAllowList::from_ips([IpAddr::V4(Ipv4Addr::new(10, 0, 0, 200))]),
            COORDINATOR_IP,
        )
        .await;

    let (status, body) = send(&bridge).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("is not allowed to call"));
    assert!(bridge.wallet.broadcasts().await.is_empty());
}

#[tokio::test]
async fn members_answer_listed_callers() {
    let bridge = TestBridge::new(2).await;
    bridge.wallet.fund(vec![utxo(1, 50_000)]).await;
    bridge
        .signers
        .set_allow_list(CallerAllowList::from_ips([COORDINATOR_IP]), COORDINATOR_IP)
        .await;

    let (status, body) = send(&bridge).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
}
