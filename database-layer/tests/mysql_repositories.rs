// Live-database integration tests for the MySQL backend. Ignored by
// default; run with a scratch database:
//
//   TEST_MYSQL_URL=mysql://root@localhost/strongroom_test \
//       cargo test -p database-layer -- --ignored
use chrono::Utc;
use database_layer::repository::mysql::{
    MySqlClientRepository, MySqlSecretRepository, MySqlTokenRepository,
};
use database_layer::repository::{ClientRepository, SecretRepository, TokenRepository};
use database_layer::{
    run_mysql_migrations, Client, DatabaseConfig, MySqlContext, Page, Secret, Token,
};
use error_common::ErrorKind;
use uuid::Uuid;

async fn connect() -> MySqlContext {
    let url = std::env::var("TEST_MYSQL_URL").expect("TEST_MYSQL_URL must be set");
    let pool = database_layer::connect_mysql(&DatabaseConfig::new(url))
        .await
        .expect("connect");
    run_mysql_migrations(&pool).await.expect("migrate");
    MySqlContext::new(pool)
}

fn secret(path: &str, version: i64) -> Secret {
    Secret {
        id: Uuid::now_v7(),
        path: path.to_string(),
        version,
        dek_id: None,
        ciphertext: vec![0x00, 0x01, 0x02, 0xFF, 0xFE, 0xFD],
        nonce: vec![0x07; 12],
        created_at: Utc::now(),
        deleted_at: None,
    }
}

#[tokio::test]
#[ignore]
async fn test_binary_id_marshaling_round_trip() {
    let ctx = connect().await;
    let repo = MySqlSecretRepository;
    let path = format!("/it/{}", Uuid::now_v7());

    let row = secret(&path, 1);
    repo.create(&ctx, &row).await.unwrap();

    // BINARY(16) ids and BLOB bytes survive lossless.
    let fetched = repo.get_by_path(&ctx, &path).await.unwrap();
    assert_eq!(fetched.id, row.id);
    assert_eq!(fetched.ciphertext, row.ciphertext);
    assert_eq!(
        fetched.created_at.timestamp_micros(),
        row.created_at.timestamp_micros()
    );
}

#[tokio::test]
#[ignore]
async fn test_unique_constraint_and_soft_delete() {
    let ctx = connect().await;
    let repo = MySqlSecretRepository;
    let path = format!("/it/{}", Uuid::now_v7());

    let row = secret(&path, 1);
    repo.create(&ctx, &row).await.unwrap();
    assert_eq!(
        repo.create(&ctx, &secret(&path, 1))
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::AlreadyExists
    );

    repo.delete(&ctx, row.id).await.unwrap();
    assert_eq!(
        repo.get_by_path(&ctx, &path).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );

    let listed = repo.list(&ctx, Page::new(0, 1000).unwrap()).await.unwrap();
    assert!(listed.iter().all(|s| s.path != path));
}

#[tokio::test]
#[ignore]
async fn test_token_hash_lookup_and_revocation() {
    let ctx = connect().await;

    let client = Client {
        id: Uuid::now_v7(),
        secret_hash: vec![9; 32],
        name: format!("it-{}", Uuid::now_v7()),
        is_active: true,
        policies: serde_json::json!({"read": ["/**"]}),
        failed_attempts: 0,
        locked_until: None,
        created_at: Utc::now(),
    };
    MySqlClientRepository.create(&ctx, &client).await.unwrap();

    let token_hash: Vec<u8> = Uuid::now_v7().as_bytes().repeat(2);
    let mut token = Token {
        id: Uuid::now_v7(),
        token_hash: token_hash.clone(),
        client_id: client.id,
        expires_at: Utc::now() + chrono::Duration::hours(1),
        revoked_at: None,
        created_at: Utc::now(),
    };
    MySqlTokenRepository.create(&ctx, &token).await.unwrap();

    let fetched = MySqlTokenRepository
        .get_by_token_hash(&ctx, &token_hash)
        .await
        .unwrap();
    assert_eq!(fetched.id, token.id);
    assert_eq!(fetched.client_id, client.id);

    token.revoked_at = Some(Utc::now());
    MySqlTokenRepository.update(&ctx, &token).await.unwrap();
    let revoked = MySqlTokenRepository.get(&ctx, token.id).await.unwrap();
    assert!(revoked.revoked_at.is_some());

    let miss = MySqlTokenRepository
        .get_by_token_hash(&ctx, &[0u8; 32])
        .await
        .unwrap_err();
    assert_eq!(miss.kind(), ErrorKind::NotFound);
}
