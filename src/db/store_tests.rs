// src/db/store_tests.rs
// Integration tests for the Store facade over an in-memory pool

use super::store::{PendingRequest, Store};
use super::translations::TranslationUpdate;
use crate::context::GLOBAL_CONTEXT;
use crate::types::{GcReport, TranslationStatus};
use futures::StreamExt;
use std::collections::HashSet;
use std::time::Duration;

fn request(text: &str, langs: &[&str], business_id: Option<&str>) -> PendingRequest {
    PendingRequest {
        text: text.to_string(),
        target_langs: langs.iter().map(|l| l.to_string()).collect(),
        source_lang: None,
        engine_version: "test-1".to_string(),
        business_id: business_id.map(Into::into),
        context_hash: GLOBAL_CONTEXT.to_string(),
        context_json: None,
    }
}

async fn open_store() -> Store {
    Store::open_in_memory().await.expect("open store")
}

#[tokio::test]
async fn test_ensure_pending_registers_once() {
    let store = open_store().await;

    let first = store.ensure_pending(request("Hello", &["zh-CN"], Some("x"))).await.unwrap();
    let second = store.ensure_pending(request("Hello", &["zh-CN"], Some("x"))).await.unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, 0);

    // Exactly one content row and one translation row exist for the key
    let (contents, translations): (i64, i64) = store
        .pool()
        .interact(|conn| {
            Ok((
                conn.query_row("SELECT COUNT(*) FROM content", [], |r| r.get(0))?,
                conn.query_row("SELECT COUNT(*) FROM translations", [], |r| r.get(0))?,
            ))
        })
        .await
        .unwrap();
    assert_eq!(contents, 1);
    assert_eq!(translations, 1);
}

#[tokio::test]
async fn test_no_null_context_hash_ever() {
    let store = open_store().await;
    store.ensure_pending(request("a", &["de"], Some("bid.a"))).await.unwrap();
    let mut with_context = request("b", &["de"], Some("bid.b"));
    with_context.context_hash = "f".repeat(64);
    with_context.context_json = Some(r#"{"k":"v"}"#.to_string());
    store.ensure_pending(with_context).await.unwrap();

    let nulls: i64 = store
        .pool()
        .interact(|conn| {
            Ok(conn.query_row(
                "SELECT (SELECT COUNT(*) FROM translations WHERE context_hash IS NULL)
                      + (SELECT COUNT(*) FROM sources WHERE context_hash IS NULL)",
                [],
                |r| r.get(0),
            )?)
        })
        .await
        .unwrap();
    assert_eq!(nulls, 0);
}

#[tokio::test]
async fn test_stream_claims_in_batches_with_limit() {
    let store = open_store().await;
    for i in 0..7 {
        store
            .ensure_pending(request(&format!("text-{i}"), &["de"], None))
            .await
            .unwrap();
    }

    let mut stream = Box::pin(store.stream_translatable(
        "de",
        vec![TranslationStatus::Pending, TranslationStatus::Failed],
        3,
        Some(5),
    ));

    let mut sizes = Vec::new();
    while let Some(batch) = stream.next().await {
        sizes.push(batch.unwrap().len());
    }
    assert_eq!(sizes, vec![3, 2], "limit of 5 across batches of 3");

    // Two rows remain claimable
    let rest = store
        .claim_batch("de".into(), vec![TranslationStatus::Pending], 10)
        .await
        .unwrap();
    assert_eq!(rest.len(), 2);
}

#[tokio::test]
async fn test_concurrent_workers_claim_disjoint_rows() {
    let store = open_store().await;
    for i in 0..20 {
        store
            .ensure_pending(request(&format!("row-{i}"), &["de"], None))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            loop {
                let batch = store
                    .claim_batch("de".into(), vec![TranslationStatus::Pending], 3)
                    .await
                    .unwrap();
                if batch.is_empty() {
                    break;
                }
                claimed.extend(batch.into_iter().map(|item| item.translation_id));
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let unique: HashSet<i64> = all.iter().copied().collect();
    assert_eq!(all.len(), 20, "every row claimed");
    assert_eq!(unique.len(), 20, "no row claimed twice");
}

#[tokio::test]
async fn test_save_and_lookup_round_trip() {
    let store = open_store().await;
    store
        .ensure_pending(request("Hello", &["zh-CN"], Some("ui.home.greeting")))
        .await
        .unwrap();

    let batch = store
        .claim_batch("zh-CN".into(), vec![TranslationStatus::Pending], 10)
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    let item = &batch[0];

    let business_id = store
        .get_business_id_for_content(item.content_id, item.context_hash.clone())
        .await
        .unwrap();
    assert_eq!(business_id.as_deref(), Some("ui.home.greeting"));

    store
        .save_translations(vec![TranslationUpdate {
            translation_id: item.translation_id,
            status: TranslationStatus::Translated,
            translated_text: Some("你好".into()),
            engine_name: Some("debug".into()),
            engine_version: Some("test-1".into()),
            error: None,
            attempts: 1,
        }])
        .await
        .unwrap();

    let stored = store
        .get_translation("Hello".into(), "zh-CN".into(), GLOBAL_CONTEXT.into())
        .await
        .unwrap()
        .expect("translated row");
    assert_eq!(stored.translated_text.as_deref(), Some("你好"));
    assert_eq!(stored.engine_name.as_deref(), Some("debug"));
}

#[tokio::test]
async fn test_failed_save_is_mirrored_to_dead_letters() {
    let store = open_store().await;
    store.ensure_pending(request("Hello", &["de"], None)).await.unwrap();
    let batch = store
        .claim_batch("de".into(), vec![TranslationStatus::Pending], 10)
        .await
        .unwrap();

    store
        .save_translations(vec![TranslationUpdate {
            translation_id: batch[0].translation_id,
            status: TranslationStatus::Failed,
            translated_text: None,
            engine_name: Some("debug".into()),
            engine_version: Some("test-1".into()),
            error: Some("upstream 500".into()),
            attempts: 3,
        }])
        .await
        .unwrap();

    let letters = store.dead_letters(10).await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].attempts, 3);
    assert_eq!(letters[0].last_error, "upstream 500");

    // The FAILED row is claimable again (re-queue path)
    let again = store
        .claim_batch(
            "de".into(),
            vec![TranslationStatus::Pending, TranslationStatus::Failed],
            10,
        )
        .await
        .unwrap();
    assert_eq!(again.len(), 1);
}

#[tokio::test]
async fn test_release_and_stale_recovery() {
    let store = open_store().await;
    store.ensure_pending(request("Hello", &["de"], None)).await.unwrap();
    let batch = store
        .claim_batch("de".into(), vec![TranslationStatus::Pending], 10)
        .await
        .unwrap();
    let id = batch[0].translation_id;

    let released = store.release_claims(vec![id]).await.unwrap();
    assert_eq!(released, 1);

    // Claim again and simulate a crashed worker via a backdated claim
    store
        .claim_batch("de".into(), vec![TranslationStatus::Pending], 10)
        .await
        .unwrap();
    store
        .pool()
        .interact(move |conn| {
            conn.execute(
                "UPDATE translations SET last_updated_at = datetime('now', '-1 hour')
                 WHERE translation_id = ?",
                [id],
            )?;
            Ok(())
        })
        .await
        .unwrap();

    let recovered = store
        .recover_stale_claims(Duration::from_secs(600))
        .await
        .unwrap();
    assert_eq!(recovered, 1);
}

#[tokio::test]
async fn test_touch_source() {
    let store = open_store().await;
    store
        .ensure_pending(request("Hello", &["de"], Some("bid")))
        .await
        .unwrap();
    assert!(store.touch_source("bid".into()).await.unwrap());
    assert!(!store.touch_source("missing".into()).await.unwrap());
}

#[tokio::test]
async fn test_gc_through_store() {
    let store = open_store().await;
    store
        .ensure_pending(request("T", &["de"], Some("bid")))
        .await
        .unwrap();
    let batch = store
        .claim_batch("de".into(), vec![TranslationStatus::Pending], 10)
        .await
        .unwrap();
    store
        .save_translations(vec![TranslationUpdate {
            translation_id: batch[0].translation_id,
            status: TranslationStatus::Translated,
            translated_text: Some("X".into()),
            engine_name: Some("debug".into()),
            engine_version: Some("test-1".into()),
            error: None,
            attempts: 1,
        }])
        .await
        .unwrap();
    store
        .pool()
        .interact(|conn| {
            conn.execute("UPDATE sources SET last_seen_at = datetime('now', '-10 days')", [])?;
            Ok(())
        })
        .await
        .unwrap();

    let report = store.garbage_collect(1, false).await.unwrap();
    assert_eq!(
        report,
        GcReport {
            deleted_sources: 1,
            deleted_content: 1,
            deleted_translations: 1,
        }
    );
}
