use super::*;
use crate::SyncError;
use crate::services::Page;

fn test_page(id: &str) -> Page {
    Page {
        id: id.to_string(),
        title: "Team Handbook".to_string(),
        properties: serde_json::Map::new(),
    }
}

fn machine(page_id: &str) -> SyncStateMachine {
    SyncStateMachine::new(SyncContext::new(page_id, "workspace"))
}

#[tokio::test]
async fn full_phase_sequence() {
    let mut sm = machine("page-1");
    let mut visited = vec![sm.phase()];

    sm.initialize().expect("initialize");
    visited.push(sm.phase());

    sm.fetch_page(|| async { Ok(Some(test_page("page-1"))) })
        .await
        .expect("fetch");
    visited.push(sm.phase());

    sm.process_properties(|| async {
        Ok(PhaseOutcome {
            items_processed: 4,
            vectors_created: 4,
        })
    })
    .await
    .expect("properties");
    visited.push(sm.phase());

    sm.process_blocks(|| async {
        Ok(PhaseOutcome {
            items_processed: 10,
            vectors_created: 12,
        })
    })
    .await
    .expect("blocks");
    visited.push(sm.phase());

    let summary = sm.complete().expect("complete");

    assert_eq!(
        visited,
        vec![
            SyncPhase::Initializing,
            SyncPhase::FetchingPage,
            SyncPhase::ProcessingProperties,
            SyncPhase::ProcessingBlocks,
            SyncPhase::Completing,
        ]
    );
    assert_eq!(summary.properties_processed, 4);
    assert_eq!(summary.blocks_processed, 10);
    assert_eq!(summary.vectors_created, 16);
    assert!(summary.errors.is_empty());
    // complete() is terminal, not a transition
    assert_eq!(sm.phase(), SyncPhase::Completing);
}

#[tokio::test]
async fn blocks_are_skipped_without_invoking_processor() {
    let mut sm = SyncStateMachine::new(
        SyncContext::new("page-2", "workspace").with_includes(true, false),
    );
    let mut visited = vec![sm.phase()];

    sm.initialize().expect("initialize");
    visited.push(sm.phase());
    sm.fetch_page(|| async { Ok(Some(test_page("page-2"))) })
        .await
        .expect("fetch");
    visited.push(sm.phase());
    sm.process_properties(|| async {
        Ok(PhaseOutcome {
            items_processed: 2,
            vectors_created: 2,
        })
    })
    .await
    .expect("properties");
    visited.push(sm.phase());

    let outcome = sm
        .process_blocks(|| async {
            panic!("block processor must not run when include_blocks is false")
        })
        .await
        .expect("skip");
    visited.push(sm.phase());

    assert_eq!(outcome, PhaseOutcome::default());
    assert_eq!(sm.context().blocks_processed, 0);
    // ProcessingBlocks is never observed when blocks are excluded
    assert_eq!(
        visited,
        vec![
            SyncPhase::Initializing,
            SyncPhase::FetchingPage,
            SyncPhase::ProcessingProperties,
            SyncPhase::Completing,
            SyncPhase::Completing,
        ]
    );

    sm.complete().expect("complete");
}

#[test]
fn empty_page_id_fails_validation() {
    let mut sm = machine("   ");
    let result = sm.initialize();
    assert!(matches!(result, Err(SyncError::Validation(_))));
    assert_eq!(sm.phase(), SyncPhase::Failed);
    assert_eq!(sm.context().errors.len(), 1);
}

#[tokio::test]
async fn missing_page_fails_with_not_found() {
    let mut sm = machine("page-3");
    sm.initialize().expect("initialize");

    let result = sm.fetch_page(|| async { Ok(None) }).await;
    assert!(matches!(result, Err(SyncError::NotFound(_))));
    assert_eq!(sm.phase(), SyncPhase::Failed);
}

#[tokio::test]
async fn fetch_error_fails_the_machine() {
    let mut sm = machine("page-4");
    sm.initialize().expect("initialize");

    let result = sm
        .fetch_page(|| async {
            Err(SyncError::ServiceUnavailable("content api down".to_string()))
        })
        .await;
    assert!(matches!(result, Err(SyncError::ServiceUnavailable(_))));
    assert_eq!(sm.phase(), SyncPhase::Failed);
    assert_eq!(sm.progress().current, 0);
}

#[tokio::test]
async fn phase_error_is_recorded_in_context() {
    let mut sm = machine("page-5");
    sm.initialize().expect("initialize");
    sm.fetch_page(|| async { Ok(Some(test_page("page-5"))) })
        .await
        .expect("fetch");

    let result = sm
        .process_properties(|| async {
            Err(SyncError::ExternalService("embedder failed".to_string()))
        })
        .await;
    assert!(result.is_err());
    assert_eq!(sm.phase(), SyncPhase::Failed);
    assert!(sm.context().errors[0].contains("embedder failed"));
}

#[tokio::test]
async fn out_of_order_call_is_rejected() {
    let mut sm = machine("page-6");
    let result = sm.complete();
    assert!(matches!(result, Err(SyncError::Validation(_))));
    assert_eq!(sm.phase(), SyncPhase::Failed);
}

#[tokio::test]
async fn progress_tracks_phases() {
    let mut sm = machine("page-7");
    assert_eq!(
        sm.progress(),
        SyncProgress {
            current: 1,
            total: 5,
            percentage: 20
        }
    );

    sm.initialize().expect("initialize");
    assert_eq!(sm.progress().current, 2);
    assert_eq!(sm.progress().percentage, 40);

    sm.fetch_page(|| async { Ok(Some(test_page("page-7"))) })
        .await
        .expect("fetch");
    assert_eq!(sm.progress().percentage, 60);

    sm.process_properties(|| async { Ok(PhaseOutcome::default()) })
        .await
        .expect("properties");
    assert_eq!(sm.progress().percentage, 80);

    sm.process_blocks(|| async { Ok(PhaseOutcome::default()) })
        .await
        .expect("blocks");
    assert_eq!(
        sm.progress(),
        SyncProgress {
            current: 5,
            total: 5,
            percentage: 100
        }
    );
}
