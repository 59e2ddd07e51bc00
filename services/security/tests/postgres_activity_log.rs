//! Activity log queries against a live PostgreSQL

use common::database::{DatabaseConfig, init_pool};
use security::{
    models::{AuthMethod, LoginStatus, NewLoginActivity},
    repositories::{self, ActivityLog, PgActivityLog, hash_password},
    request_info::RequestInfo,
};
use uuid::Uuid;

fn attempt(user_id: Uuid, session_id: &str, status: LoginStatus) -> NewLoginActivity {
    let request = RequestInfo {
        ip_address: "198.51.100.7".to_string(),
        device_type: Some("desktop".to_string()),
        browser: Some("Firefox".to_string()),
        os: None,
        country: Some("CA".to_string()),
        ..Default::default()
    };
    NewLoginActivity::from_request(
        Some(user_id),
        Some(session_id.to_string()),
        AuthMethod::Password,
        false,
        status,
        None,
        &request,
    )
}

#[tokio::test]
#[ignore = "requires running PostgreSQL"]
async fn test_activity_log_queries() -> anyhow::Result<()> {
    let pool = init_pool(&DatabaseConfig::from_env()?).await?;
    repositories::migrate(&pool).await?;

    let user_id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, username, email, password_hash) VALUES ($1, $2, $3, $4)")
        .bind(user_id)
        .bind(format!("user-{user_id}"))
        .bind(format!("{user_id}@example.com"))
        .bind(hash_password("integration")?)
        .execute(&pool)
        .await?;

    let log = PgActivityLog::new(pool.clone());
    log.insert(&attempt(user_id, "s1", LoginStatus::Failed)).await?;
    let stored = log.insert(&attempt(user_id, "s1", LoginStatus::Success)).await?;
    assert_eq!(stored.status, LoginStatus::Success);

    assert_eq!(
        log.count_failures_since(user_id, chrono::Utc::now() - chrono::Duration::hours(1))
            .await?,
        1
    );
    assert!(log
        .has_device_match(user_id, Some("desktop"), Some("Firefox"), None)
        .await?);
    assert!(!log
        .has_device_match(user_id, Some("desktop"), Some("Firefox"), Some("Linux"))
        .await?);
    assert!(log.has_country(user_id, "CA").await?);

    let latest = log.latest_by_session(user_id, &["s1".to_string()]).await?;
    assert_eq!(latest["s1"].id, stored.id);
    assert_eq!(log.list_for_user(user_id, 10).await?.len(), 2);

    // A success without a user violates the table constraint
    let mut orphan = attempt(user_id, "s2", LoginStatus::Success);
    orphan.user_id = None;
    assert!(log.insert(&orphan).await.is_err());

    pool.close().await;
    Ok(())
}
