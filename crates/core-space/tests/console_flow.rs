//! End-to-end: a console message wakes the agent, whose reply appears as a
//! console-output side effect within two frames.

mod common;

use common::*;
use core_tree::Element;

#[tokio::test]
async fn console_message_produces_an_agent_reply_in_two_frames() {
    let mut space = space_with(Box::new(ConsoleFixture::new()));
    space
        .add_element("space", Element::new("agent", "agent"))
        .unwrap();
    space
        .add_component("agent", Box::new(EchoAgentFixture))
        .unwrap();

    space.enqueue(event("console:input", serde_json::json!({ "input": "hello" })));

    // Frame 1: receptor lands the durable message and the one-shot
    // activation; the agent effector replies in the same frame (the
    // activation is in the merged change log).
    let summary1 = space.process_frame().await.unwrap();
    {
        let veil = space.veil();
        let messages: Vec<_> = veil.facets_of_type("console-message").collect();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content.as_deref(), Some("hello"));
        assert!(!messages[0].ephemeral, "console messages are durable");
    }

    let activations: Vec<String> = space
        .veil()
        .facets_of_type("agent-activation")
        .map(|f| f.id.clone())
        .collect();
    assert_eq!(activations.len(), 1);
    assert_eq!(
        space
            .veil()
            .facet(&activations[0])
            .unwrap()
            .attribute("sourceAgentId"),
        Some(&serde_json::json!("user"))
    );

    let outputs: Vec<_> = summary1
        .external_actions
        .iter()
        .filter(|a| a.kind == "console-output")
        .collect();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].payload["text"], serde_json::json!("you said: hello"));

    // Frame 2: the activation is ephemeral and must be gone by the end.
    let summary2 = space.process_frame().await.unwrap();
    assert!(
        space
            .veil()
            .facets_of_type("agent-activation")
            .next()
            .is_none(),
        "one-shot activation cleaned up"
    );
    // The cleanup removal does not re-trigger the agent.
    assert!(summary2.external_actions.is_empty());

    // The durable message survives.
    assert_eq!(space.veil().facets_of_type("console-message").count(), 1);
}

#[tokio::test]
async fn each_message_triggers_exactly_one_reply() {
    let mut space = space_with(Box::new(ConsoleFixture::new()));
    space
        .add_element("space", Element::new("agent", "agent"))
        .unwrap();
    space
        .add_component("agent", Box::new(EchoAgentFixture))
        .unwrap();

    let mut replies = 0;
    for input in ["one", "two", "three"] {
        space.enqueue(event("console:input", serde_json::json!({ "input": input })));
        let summary = space.process_frame().await.unwrap();
        replies += summary
            .external_actions
            .iter()
            .filter(|a| a.kind == "console-output")
            .count();
        // Settle the cleanup frame in between.
        let summary = space.process_frame().await.unwrap();
        replies += summary.external_actions.len();
    }
    assert_eq!(replies, 3);
    assert_eq!(space.veil().facets_of_type("console-message").count(), 3);
}
