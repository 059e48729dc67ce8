use chrono::{DateTime, TimeDelta, Utc};
use openid_store::{
    Association, OpenIdStore, StoreConfig, StoreError, mint_nonce, mint_nonce_at, split_nonce,
};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tempfile::TempDir;

const SERVER_URL: &str = "http://www.myopenid.com/openid";
const DEFAULT_SKEW: u64 = 300;

async fn open_store() -> (OpenIdStore, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = temp_dir.path().join("openid_store.db");
    let store = OpenIdStore::from_config(&StoreConfig::sqlite(path.display().to_string()))
        .await
        .expect("Failed to open store");
    (store, temp_dir)
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// 生成 issued_at = now + offset 的关联（整秒精度）
fn gen_assoc(offset: i64, lifetime: u64) -> Association {
    let secret: Vec<u8> = (0..20).map(|_| rand::random::<u8>()).collect();
    let issued_at = DateTime::from_timestamp(Utc::now().timestamp() + offset, 0).unwrap();
    Association::new(random_string(128), secret, issued_at, lifetime, "HMAC-SHA1")
}

async fn check_retrieve(
    store: &OpenIdStore,
    url: &str,
    handle: Option<&str>,
    expected: Option<&Association>,
) {
    let actual = store
        .associations()
        .get(url, handle)
        .await
        .expect("get failed");
    assert_eq!(actual.as_ref(), expected, "url={url}, handle={handle:?}");
}

async fn check_remove(store: &OpenIdStore, url: &str, handle: &str, expected: bool) {
    let removed = store
        .associations()
        .remove(url, handle)
        .await
        .expect("remove failed");
    assert_eq!(removed, expected, "url={url}, handle={handle}");
}

#[tokio::test]
async fn test_association_lifecycle() {
    let (store, _dir) = open_store().await;
    let assoc = gen_assoc(0, 600);

    // 不存在时返回 None
    check_retrieve(&store, SERVER_URL, None, None).await;

    store.associations().store(SERVER_URL, &assoc).await.unwrap();
    check_retrieve(&store, SERVER_URL, None, Some(&assoc)).await;
    check_retrieve(&store, SERVER_URL, None, Some(&assoc)).await;

    // 重复保存没有副作用
    store.associations().store(SERVER_URL, &assoc).await.unwrap();
    check_retrieve(&store, SERVER_URL, None, Some(&assoc)).await;
    assert_eq!(store.associations().count().await.unwrap(), 1);

    let missing_handle = format!("{}x", assoc.handle);
    let missing_url = format!("{SERVER_URL}x");
    check_remove(&store, SERVER_URL, &missing_handle, false).await;
    check_remove(&store, &missing_url, &assoc.handle, false).await;
    check_remove(&store, SERVER_URL, &assoc.handle, true).await;
    check_remove(&store, SERVER_URL, &assoc.handle, false).await;

    store.associations().store(SERVER_URL, &assoc).await.unwrap();

    // 更新且过期更晚
    let assoc2 = gen_assoc(1, 600);
    store.associations().store(SERVER_URL, &assoc2).await.unwrap();
    check_retrieve(&store, SERVER_URL, None, Some(&assoc2)).await;
    check_retrieve(&store, SERVER_URL, Some(&assoc.handle), Some(&assoc)).await;
    check_retrieve(&store, SERVER_URL, Some(&assoc2.handle), Some(&assoc2)).await;

    // 更新但过期更早：按 issued_at 选，不看过期时间
    let assoc3 = gen_assoc(2, 100);
    store.associations().store(SERVER_URL, &assoc3).await.unwrap();
    check_retrieve(&store, SERVER_URL, None, Some(&assoc3)).await;
    check_retrieve(&store, SERVER_URL, Some(&assoc.handle), Some(&assoc)).await;
    check_retrieve(&store, SERVER_URL, Some(&assoc2.handle), Some(&assoc2)).await;
    check_retrieve(&store, SERVER_URL, Some(&assoc3.handle), Some(&assoc3)).await;

    check_remove(&store, SERVER_URL, &assoc2.handle, true).await;
    check_retrieve(&store, SERVER_URL, None, Some(&assoc3)).await;
    check_retrieve(&store, SERVER_URL, Some(&assoc.handle), Some(&assoc)).await;
    check_retrieve(&store, SERVER_URL, Some(&assoc2.handle), None).await;
    check_retrieve(&store, SERVER_URL, Some(&assoc3.handle), Some(&assoc3)).await;

    check_remove(&store, SERVER_URL, &assoc2.handle, false).await;
    check_remove(&store, SERVER_URL, &assoc3.handle, true).await;
    check_retrieve(&store, SERVER_URL, None, Some(&assoc)).await;
    check_retrieve(&store, SERVER_URL, Some(&assoc.handle), Some(&assoc)).await;
    check_retrieve(&store, SERVER_URL, Some(&assoc2.handle), None).await;
    check_retrieve(&store, SERVER_URL, Some(&assoc3.handle), None).await;

    check_remove(&store, SERVER_URL, &assoc2.handle, false).await;
    check_remove(&store, SERVER_URL, &assoc.handle, true).await;
    check_remove(&store, SERVER_URL, &assoc3.handle, false).await;
    check_retrieve(&store, SERVER_URL, None, None).await;
    check_retrieve(&store, SERVER_URL, Some(&assoc.handle), None).await;
    check_retrieve(&store, SERVER_URL, Some(&assoc2.handle), None).await;
    check_retrieve(&store, SERVER_URL, Some(&assoc3.handle), None).await;
}

#[tokio::test]
async fn test_latest_ignores_insertion_order() {
    let (store, _dir) = open_store().await;
    let t0 = gen_assoc(0, 600);
    let t1 = gen_assoc(1, 600);
    let t2 = gen_assoc(2, 600);

    for assoc in [&t2, &t0, &t1] {
        store.associations().store(SERVER_URL, assoc).await.unwrap();
    }

    check_retrieve(&store, SERVER_URL, None, Some(&t2)).await;
}

#[tokio::test]
async fn test_latest_tie_break_is_stable() {
    let (store, _dir) = open_store().await;
    let issued_at = DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap();
    let handles = ["first", "second", "third"];

    for handle in handles {
        let assoc = Association::new(handle, b"k".to_vec(), issued_at, 600, "HMAC-SHA1");
        store.associations().store(SERVER_URL, &assoc).await.unwrap();
    }

    // issued_at 相同时取最后写入的一条，且多次查询结果一致
    for _ in 0..3 {
        let latest = store
            .associations()
            .get(SERVER_URL, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.handle, "third");
    }
}

#[tokio::test]
async fn test_associations_scoped_by_server_url() {
    let (store, _dir) = open_store().await;
    let assoc = gen_assoc(0, 600);
    let other = format!("{SERVER_URL}/other");

    store.associations().store(SERVER_URL, &assoc).await.unwrap();
    // 同一句柄可以属于不同的 server_url
    store.associations().store(&other, &assoc).await.unwrap();
    assert_eq!(store.associations().count().await.unwrap(), 2);

    check_remove(&store, &other, &assoc.handle, true).await;
    check_retrieve(&store, SERVER_URL, Some(&assoc.handle), Some(&assoc)).await;
    check_retrieve(&store, &other, None, None).await;
}

#[tokio::test]
async fn test_expired_association_not_returned() {
    let (store, _dir) = open_store().await;
    let expired = gen_assoc(-7200, 3600);

    store.associations().store(SERVER_URL, &expired).await.unwrap();
    check_retrieve(&store, SERVER_URL, None, None).await;
    check_retrieve(&store, SERVER_URL, Some(&expired.handle), None).await;

    // 过期但尚未清理的记录仍可删除
    check_remove(&store, SERVER_URL, &expired.handle, true).await;
}

#[tokio::test]
async fn test_association_cleanup() {
    let (store, _dir) = open_store().await;
    let valid1 = gen_assoc(-3600, 7200);
    let valid2 = gen_assoc(-5, 600);
    let expired1 = gen_assoc(-7200, 3600);
    let expired2 = gen_assoc(-7200, 3600);

    assert_eq!(store.associations().cleanup().await.unwrap(), 0);

    let url1 = format!("{SERVER_URL}1");
    let url2 = format!("{SERVER_URL}2");
    let url3 = format!("{SERVER_URL}3");
    store.associations().store(&url1, &valid1).await.unwrap();
    store.associations().store(&url1, &expired1).await.unwrap();
    store.associations().store(&url2, &expired2).await.unwrap();
    store.associations().store(&url3, &valid2).await.unwrap();

    assert_eq!(store.associations().cleanup().await.unwrap(), 2);
    assert_eq!(store.associations().count().await.unwrap(), 2);

    check_retrieve(&store, &url1, None, Some(&valid1)).await;
    check_retrieve(&store, &url2, None, None).await;
    check_retrieve(&store, &url3, Some(&valid2.handle), Some(&valid2)).await;
}

async fn use_nonce(store: &OpenIdStore, url: &str, nonce: &str, skew: u64) -> bool {
    let (timestamp, salt) = split_nonce(nonce).expect("nonce should split");
    store
        .nonces()
        .use_nonce(url, timestamp, &salt, skew)
        .await
        .expect("use_nonce failed")
}

#[tokio::test]
async fn test_nonce_single_use() {
    let (store, _dir) = open_store().await;

    for url in [SERVER_URL, ""] {
        let nonce = mint_nonce();
        assert!(use_nonce(&store, url, &nonce, DEFAULT_SKEW).await, "{url}: allowed by default");
        assert!(!use_nonce(&store, url, &nonce, DEFAULT_SKEW).await, "{url}: not allowed twice");
        assert!(!use_nonce(&store, url, &nonce, DEFAULT_SKEW).await, "{url}: not allowed third time");

        // 过旧的 nonce 首次使用也会被拒绝
        let old_nonce = mint_nonce_at(DateTime::from_timestamp(3600, 0).unwrap()).unwrap();
        assert!(!use_nonce(&store, url, &old_nonce, DEFAULT_SKEW).await, "{url}: old nonce passed");
    }

    // 空 server_url 与真实 URL 是不同的作用域
    assert_eq!(store.nonces().count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_future_nonce_outside_skew_rejected() {
    let (store, _dir) = open_store().await;
    let now = Utc::now();

    let future = now.timestamp() + 3600;
    assert!(
        !store
            .nonces()
            .use_nonce(SERVER_URL, future, "abcdef", DEFAULT_SKEW)
            .await
            .unwrap()
    );

    let near_future = now.timestamp() + 60;
    assert!(
        store
            .nonces()
            .use_nonce(SERVER_URL, near_future, "abcdef", DEFAULT_SKEW)
            .await
            .unwrap()
    );

    // 只有窗口内的 nonce 落库
    assert_eq!(store.nonces().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_nonce_cleanup() {
    let (store, _dir) = open_store().await;
    let now = Utc::now();
    let old_nonce1 = mint_nonce_at(now - TimeDelta::seconds(20_000)).unwrap();
    let old_nonce2 = mint_nonce_at(now - TimeDelta::seconds(10_000)).unwrap();
    let recent_nonce = mint_nonce_at(now - TimeDelta::seconds(600)).unwrap();

    assert!(use_nonce(&store, SERVER_URL, &old_nonce1, 1_000_000).await, "old_nonce1");
    assert!(use_nonce(&store, SERVER_URL, &old_nonce2, 1_000_000).await, "old_nonce2");
    assert!(use_nonce(&store, SERVER_URL, &recent_nonce, 1_000_000).await, "recent_nonce");

    assert_eq!(store.nonces().cleanup(1000).await.unwrap(), 2);

    assert!(use_nonce(&store, SERVER_URL, &old_nonce1, 100_000).await, "old_nonce1 after cleanup");
    assert!(use_nonce(&store, SERVER_URL, &old_nonce2, 100_000).await, "old_nonce2 after cleanup");
    assert!(!use_nonce(&store, SERVER_URL, &recent_nonce, 100_000).await, "recent_nonce after cleanup");
}

#[tokio::test]
async fn test_concurrent_claims_have_one_winner() {
    let (store, _dir) = open_store().await;
    let nonce = mint_nonce();
    let (timestamp, salt) = split_nonce(&nonce).unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        let salt = salt.clone();
        handles.push(tokio::spawn(async move {
            store
                .nonces()
                .use_nonce(SERVER_URL, timestamp, &salt, DEFAULT_SKEW)
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(store.nonces().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_store_is_idempotent() {
    let (store, _dir) = open_store().await;
    let assoc = gen_assoc(0, 600);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let assoc = assoc.clone();
        handles.push(tokio::spawn(async move {
            store.associations().store(SERVER_URL, &assoc).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.associations().count().await.unwrap(), 1);
    check_retrieve(&store, SERVER_URL, None, Some(&assoc)).await;
}

#[test]
fn test_split_nonce_rejects_short_input() {
    assert!(matches!(
        split_nonce("2024-01-01T00:00"),
        Err(StoreError::MalformedNonce(_))
    ));
}
