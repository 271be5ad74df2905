//! End-to-end pipeline tests with a scripted agent runtime.

use std::sync::Arc;
use std::time::Duration;

use agentpool::{
    AgentPoolConfig, AgentStatus, Pipeline, PoolError, RuntimeReply, ScriptedRuntime, Stage,
};
use async_trait::async_trait;

fn config() -> AgentPoolConfig {
    AgentPoolConfig {
        timeout_secs: 30,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_handoff_substitutes_previous_response() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(
        vec![
            Stage::new("city", "Name a city: Tokyo."),
            Stage::new("population", "Population of {previous_response}?"),
        ],
        config(),
    )
    .unwrap()
    .with_workspace(dir.path())
    .with_runtime(Arc::new(ScriptedRuntime::new(|request| {
        match request.agent_id.as_str() {
            "pipeline-city" => {
                assert_eq!(request.prompt, "Name a city: Tokyo.");
                Ok(RuntimeReply {
                    response: "Tokyo".to_string(),
                    ..Default::default()
                })
            }
            "pipeline-population" => {
                assert_eq!(request.prompt, "Population of Tokyo?");
                Ok(RuntimeReply {
                    response: "about 14 million".to_string(),
                    ..Default::default()
                })
            }
            other => panic!("unexpected stage agent: {other}"),
        }
    })));

    let result = pipeline.run().await;
    assert!(result.success());
    assert_eq!(result.stages.len(), 2);
    assert_eq!(result.final_response(), "about 14 million");
}

#[tokio::test]
async fn test_stage_failure_stops_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(
        vec![
            Stage::new("one", "first"),
            Stage::new("two", "second"),
            Stage::new("three", "third"),
        ],
        config(),
    )
    .unwrap()
    .with_workspace(dir.path())
    .with_runtime(Arc::new(ScriptedRuntime::new(|request| {
        if request.agent_id == "pipeline-two" {
            Err(PoolError::AgentExecution("stage blew up".to_string()))
        } else {
            Ok(RuntimeReply {
                response: "ok".to_string(),
                ..Default::default()
            })
        }
    })));

    let result = pipeline.run().await;
    assert!(!result.success());
    // Stage three never executes.
    assert_eq!(result.stages.len(), 2);
    assert_eq!(result.stages[0].status, AgentStatus::Completed);
    assert_eq!(result.stages[1].status, AgentStatus::Error);
    assert!(
        result.stages[1]
            .error
            .as_deref()
            .unwrap()
            .contains("stage blew up")
    );
}

#[tokio::test]
async fn test_stage_timeout_stops_pipeline() {
    struct StallsOnSecond;

    #[async_trait]
    impl agentpool::AgentRuntime for StallsOnSecond {
        async fn run(
            &self,
            request: agentpool::RuntimeRequest,
        ) -> agentpool::Result<RuntimeReply> {
            if request.agent_id == "pipeline-slow" {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(RuntimeReply::default())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(
        vec![
            Stage::new("fast", "quick work"),
            Stage::new("slow", "slow work").with_timeout_secs(1),
            Stage::new("after", "never runs"),
        ],
        config(),
    )
    .unwrap()
    .with_workspace(dir.path())
    .with_runtime(Arc::new(StallsOnSecond));

    let result = pipeline.run().await;
    assert!(!result.success());
    assert_eq!(result.stages.len(), 2);
    assert_eq!(result.stages[1].status, AgentStatus::Timeout);
}

#[tokio::test]
async fn test_stages_share_the_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(
        vec![
            Stage::new("write", "produce notes"),
            Stage::new("read", "use the notes"),
        ],
        config(),
    )
    .unwrap()
    .with_workspace(dir.path())
    .with_runtime(Arc::new(ScriptedRuntime::new(|request| {
        let notes = request.workspace.join("notes.txt");
        match request.agent_id.as_str() {
            "pipeline-write" => {
                std::fs::write(&notes, "findings from stage one").unwrap();
                Ok(RuntimeReply::default())
            }
            _ => {
                let content = std::fs::read_to_string(&notes).unwrap();
                Ok(RuntimeReply {
                    response: content,
                    ..Default::default()
                })
            }
        }
    })));

    let result = pipeline.run().await;
    assert!(result.success());
    assert_eq!(result.final_response(), "findings from stage one");
}

#[tokio::test]
async fn test_transform_shapes_the_handoff() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(
        vec![
            Stage::new("gather", "collect keywords"),
            Stage::new("expand", "Expand on: {previous_response}")
                .with_transform(|prev| prev.trim().to_lowercase()),
        ],
        config(),
    )
    .unwrap()
    .with_workspace(dir.path())
    .with_runtime(Arc::new(ScriptedRuntime::new(|request| {
        if request.agent_id == "pipeline-gather" {
            Ok(RuntimeReply {
                response: "  RUST Async  ".to_string(),
                ..Default::default()
            })
        } else {
            assert_eq!(request.prompt, "Expand on: rust async");
            Ok(RuntimeReply {
                response: "done".to_string(),
                ..Default::default()
            })
        }
    })));

    let result = pipeline.run().await;
    assert!(result.success());
}
