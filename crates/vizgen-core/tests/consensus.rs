//! Consensus validator against a scripted panel

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use vizgen_core::{
    AbsentVotePolicy, Artifact, ConsensusValidator, ContentType, PromptBook, StageContext,
    TransportError,
};
use vizgen_test_utils::{test_config, Scripted, ScriptedGateway, VOTERS};

const CANDIDATE: &str = "function draw() { line(0, 0, 400, 400); }";

fn panel_gateway(replies: [&str; 3]) -> ScriptedGateway {
    VOTERS
        .iter()
        .zip(replies)
        .fold(ScriptedGateway::new(), |gateway, (voter, reply)| gateway.always(voter, reply))
}

async fn validate(
    gateway: &ScriptedGateway,
    validator: &ConsensusValidator,
) -> Result<vizgen_core::ConsensusOutcome, vizgen_core::StageError> {
    let prompts = PromptBook::new();
    let cancel = CancellationToken::new();
    let ctx = StageContext::new(gateway, &prompts, &cancel, Duration::from_secs(5))
        .with_content_type(ContentType::Math)
        .with_verified("y = x");
    validator.validate(&ctx, &Artifact::new(CANDIDATE)).await
}

fn strict() -> ConsensusValidator {
    ConsensusValidator::new(test_config().panel, AbsentVotePolicy::Reject)
}

#[tokio::test]
async fn three_voters_pass_iff_two_accept() {
    for mask in 0u8..8 {
        let replies = [0, 1, 2].map(|i| if mask & (1 << i) != 0 { "YES" } else { "NO: line is not a curve" });
        let gateway = panel_gateway(replies);

        let outcome = validate(&gateway, &strict()).await.unwrap();
        let accepts = mask.count_ones() as usize;

        assert_eq!(outcome.passed(), accepts >= 2, "mask {mask:03b}");
        assert_eq!(outcome.accepts(), accepts);
        assert_eq!(outcome.votes.len(), 3);
        assert_eq!(outcome.dissent_feedback.len(), 3 - accepts);
        assert!(outcome.enhanced_artifact.is_none());
        for voter in VOTERS {
            assert_eq!(gateway.calls(voter), 1);
        }
    }
}

#[tokio::test]
async fn voters_see_candidate_and_verified_content() {
    let gateway = panel_gateway(["YES", "YES", "YES"]);
    validate(&gateway, &strict()).await.unwrap();

    let prompt = &gateway.prompts_for("vote.qwen")[0];
    assert!(prompt.contains(CANDIDATE));
    assert!(prompt.contains("y = x"));
}

#[tokio::test]
async fn dissent_is_labelled_in_panel_order() {
    let gateway = panel_gateway(["NO: axes missing", "YES", "no - wrong colors"]);
    let outcome = validate(&gateway, &strict()).await.unwrap();

    assert!(!outcome.passed());
    assert_eq!(
        outcome.dissent_feedback,
        vec!["gemini: axes missing".to_string(), "llama: wrong colors".to_string()]
    );
}

#[tokio::test]
async fn pass_with_dissent_produces_distinct_enhanced_artifact() {
    let gateway = panel_gateway(["YES", "NO: add axis labels", "YES"])
        .always("enhance", "```js\nfunction draw() { line(0, 0, 400, 400); text('x', 390, 200); }\n```");
    let validator = strict().with_enhancer("enhance");

    let outcome = validate(&gateway, &validator).await.unwrap();
    assert!(outcome.passed());

    let enhanced = outcome.enhanced_artifact.expect("enhanced artifact");
    assert_eq!(
        enhanced.content(),
        "function draw() { line(0, 0, 400, 400); text('x', 390, 200); }"
    );
    assert!(!enhanced.same_content(&Artifact::new(CANDIDATE)));

    let prompt = &gateway.prompts_for("enhance")[0];
    assert!(prompt.contains("add axis labels"));
    assert!(!prompt.contains("qwen:"));
}

#[tokio::test]
async fn unanimous_pass_skips_enhancement() {
    let gateway = panel_gateway(["YES: fine", "YES", "YES"]).always("enhance", "unused");
    let outcome = validate(&gateway, &strict().with_enhancer("enhance")).await.unwrap();

    assert!(outcome.passed());
    assert!(outcome.enhanced_artifact.is_none());
    assert_eq!(gateway.calls("enhance"), 0);
}

#[tokio::test]
async fn enhancement_failure_keeps_candidate() {
    let gateway = panel_gateway(["YES", "NO: add axis labels", "YES"])
        .always_fail("enhance", TransportError::Status { code: 500, body: "oops".into() });

    let outcome = validate(&gateway, &strict().with_enhancer("enhance")).await.unwrap();
    assert!(outcome.passed());
    assert!(outcome.enhanced_artifact.is_none());
}

#[tokio::test]
async fn absent_votes_follow_policy() {
    let gateway = ScriptedGateway::new()
        .always("vote.gemini", "YES")
        .always_fail("vote.qwen", TransportError::Timeout { ms: 5_000 })
        .always("vote.llama", "Looks fine to me");

    let outcome = validate(&gateway, &strict()).await.unwrap();
    assert!(!outcome.passed());
    assert!(!outcome.votes[1].responded);
    assert!(!outcome.votes[2].responded);
    assert_eq!(outcome.dissent_feedback, vec!["llama: Looks fine to me".to_string()]);

    let abstain = ConsensusValidator::new(test_config().panel, AbsentVotePolicy::Abstain);
    let outcome = validate(&gateway, &abstain).await.unwrap();
    assert!(outcome.passed());
}

#[tokio::test]
async fn voters_run_concurrently() {
    let delayed = |reply: &str| Scripted::Delayed(Duration::from_millis(300), Box::new(Scripted::text(reply)));
    let gateway = VOTERS
        .iter()
        .fold(ScriptedGateway::new(), |gateway, voter| gateway.push(voter, delayed("YES")));

    let started = Instant::now();
    let outcome = validate(&gateway, &strict()).await.unwrap();
    assert!(outcome.passed());
    assert!(started.elapsed() < Duration::from_millis(800));
}

#[tokio::test]
async fn cancellation_discards_partial_votes() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .always("vote.gemini", "YES")
            .push("vote.qwen", Scripted::Delayed(Duration::from_secs(10), Box::new(Scripted::text("YES"))))
            .push("vote.llama", Scripted::Delayed(Duration::from_secs(10), Box::new(Scripted::text("YES")))),
    );
    let prompts = PromptBook::new();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let ctx = StageContext::new(gateway.as_ref(), &prompts, &cancel, Duration::from_secs(30))
        .with_content_type(ContentType::Logic)
        .with_verified("sort steps");
    let started = Instant::now();
    let err = strict()
        .validate(&ctx, &Artifact::new(CANDIDATE))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.stage, "validate");
    assert!(started.elapsed() < Duration::from_secs(2));
}
