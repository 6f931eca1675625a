//! Dispatch against real subprocesses.

use std::sync::Arc;
use std::time::Duration;

use orchestra_core::{
    Agent, AgentRegistry, DispatchFailure, Dispatcher, OrchestraError, ProcessRunner,
    PromptDelivery,
};

fn sh(name: &str, script: &str) -> Agent {
    Agent::new(name, "sh").with_args(["-c", script])
}

fn dispatcher(agents: Vec<Agent>) -> Dispatcher {
    let registry = AgentRegistry::from_agents(agents).unwrap();
    Dispatcher::new(Arc::new(registry), Arc::new(ProcessRunner::new()))
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn stdin_agent_receives_prompt() {
    let d = dispatcher(vec![sh("echoer", "cat")]);
    let entries = d
        .dispatch(&names(&["echoer"]), "write a parser", None, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    let response = entries[0].result.as_ref().unwrap();
    assert_eq!(response.stdout, "write a parser");
    assert_eq!(response.exit_code, 0);
}

#[tokio::test]
async fn argument_agent_receives_prompt_in_args() {
    let agent = Agent::new("argy", "sh")
        .with_args(["-c", "printf '%s' \"$1\"", "argy", "{prompt}"])
        .with_delivery(PromptDelivery::Argument);
    let d = dispatcher(vec![agent]);
    let entries = d
        .dispatch(&names(&["argy"]), "hello there", None, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(entries[0].result.as_ref().unwrap().stdout, "hello there");
}

#[tokio::test]
async fn one_entry_per_agent_with_mixed_failures() {
    let d = dispatcher(vec![
        sh("ok", "echo done"),
        sh("broken", "echo boom >&2; exit 3"),
        sh("slow", "sleep 5"),
        Agent::new("ghost", "orchestra-test-no-such-binary"),
    ]);
    let entries = d
        .dispatch(
            &names(&["ghost", "slow", "broken", "ok"]),
            "task",
            None,
            Duration::from_millis(500),
        )
        .await
        .unwrap();

    let order: Vec<&str> = entries.iter().map(|e| e.agent.as_str()).collect();
    assert_eq!(order, vec!["ok", "broken", "slow", "ghost"]);

    assert_eq!(entries[0].result.as_ref().unwrap().stdout, "done\n");
    match &entries[1].result {
        Err(DispatchFailure::NonZeroExit { code, stderr }) => {
            assert_eq!(*code, 3);
            assert!(stderr.contains("boom"));
        }
        other => panic!("expected non-zero exit, got {:?}", other),
    }
    assert!(matches!(
        entries[2].result,
        Err(DispatchFailure::Timeout { limit_ms: 500 })
    ));
    assert!(entries[3].is_unavailable());
}

#[tokio::test]
async fn agents_run_concurrently() {
    let d = dispatcher(vec![
        sh("a", "sleep 1; echo a"),
        sh("b", "sleep 1; echo b"),
        sh("c", "sleep 1; echo c"),
    ]);
    let started = std::time::Instant::now();
    let entries = d
        .dispatch(&names(&["a", "b", "c"]), "x", None, Duration::from_secs(10))
        .await
        .unwrap();
    assert!(entries.iter().all(|e| e.is_success()));
    assert!(started.elapsed() < Duration::from_millis(2500));
}

#[tokio::test]
async fn all_unavailable_is_an_error() {
    let d = dispatcher(vec![
        Agent::new("ghost", "orchestra-test-no-such-binary"),
        Agent::new("phantom", "orchestra-test-also-missing"),
    ]);
    let err = d
        .dispatch(&names(&["ghost", "phantom"]), "x", None, Duration::from_secs(1))
        .await
        .unwrap_err();
    match err {
        OrchestraError::NoAgentsAvailable { requested } => {
            assert_eq!(requested, names(&["ghost", "phantom"]));
        }
        other => panic!("unexpected error: {other}"),
    }
}
