//! End-to-end onboarding turns against a scripted model and in-memory libSQL.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use crew_assist::config::OnboardingConfig;
use crew_assist::error::{Error, LlmError};
use crew_assist::llm::{CompletionRequest, CompletionResponse, LlmProvider};
use crew_assist::onboarding::model::{ExperienceLevel, Flow, Profile, UserRole};
use crew_assist::onboarding::types::ApprovedAction;
use crew_assist::onboarding::{AgentDeps, OnboardingAgent, OnboardingStep, TurnRequest};
use crew_assist::store::{Database, LibSqlBackend};
use crew_assist::tools::ToolRegistry;

/// Replays canned responses in order and records every request.
struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    fallback: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Same reply forever.
    fn repeating(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Some(reply.to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn system_prompt(&self, index: usize) -> String {
        self.requests.lock().unwrap()[index].system_prompt.clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request);
        let next = self.replies.lock().unwrap().pop_front();
        match next.or_else(|| self.fallback.clone()) {
            Some(content) => Ok(CompletionResponse { content }),
            None => Err(LlmError::RequestFailed {
                provider: "scripted".to_string(),
                reason: "script exhausted".to_string(),
            }),
        }
    }
}

fn call(name: &str, arguments: Value) -> String {
    format!(
        "```tool_call\n{}\n```",
        json!({"name": name, "arguments": arguments})
    )
}

async fn setup(flow: Flow, llm: Arc<ScriptedLlm>) -> (OnboardingAgent, Arc<dyn Database>) {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let deps = AgentDeps {
        db: db.clone(),
        llm,
        tools: Arc::new(ToolRegistry::builtin()),
    };
    (
        OnboardingAgent::new(flow, OnboardingConfig::default(), deps),
        db,
    )
}

async fn seed_owner_profile(db: &Arc<dyn Database>, user_id: &str) {
    let profile = Profile::new(user_id, &format!("{user_id}_skipper"), UserRole::Owner);
    db.insert_profile(&profile).await.unwrap();
}

#[tokio::test]
async fn fresh_owner_creates_profile_and_turn_short_circuits() {
    let reply = format!(
        "Lovely to meet you, Ben!\n{}",
        call(
            "create_profile",
            json!({"full_name": "Ben Halyard", "sailing_experience": "I've done a few day sails"})
        )
    );
    let llm = ScriptedLlm::new(&[&reply]);
    let (agent, db) = setup(Flow::Owner, llm.clone()).await;

    let (step, _) = agent.status(Some("owner-1")).await.unwrap();
    assert_eq!(step, OnboardingStep::CreateProfile);

    let response = agent
        .process_turn(TurnRequest::new("Hi, I'm Ben").with_identity("owner-1"))
        .await
        .unwrap();

    assert_eq!(llm.calls(), 1);
    assert_eq!(response.step, OnboardingStep::AddBoat);
    assert!(response.entities.profile_created);
    assert!(!response.exhausted);
    assert!(response.message.content.starts_with("Your profile is saved."));

    let profile = db.get_profile_by_user("owner-1").await.unwrap().unwrap();
    assert_eq!(profile.sailing_experience, Some(ExperienceLevel::Beginner));
    assert!(profile.has_role(UserRole::Owner));
}

#[tokio::test]
async fn only_step_tools_are_offered() {
    let llm = ScriptedLlm::new(&["What should I call you?"]);
    let (agent, _db) = setup(Flow::Owner, llm.clone()).await;
    agent
        .process_turn(TurnRequest::new("Hello").with_identity("owner-1"))
        .await
        .unwrap();

    let prompt = llm.system_prompt(0);
    assert!(prompt.contains("### create_profile"));
    assert!(!prompt.contains("### create_boat"));
    assert!(!prompt.contains("### create_journey"));
}

#[tokio::test]
async fn calls_chain_within_one_response() {
    let reply = format!(
        "{}\n{}",
        call("create_profile", json!({"full_name": "Ben Halyard"})),
        call(
            "create_boat",
            json!({"name": "Saltwhistle", "make_model": "Contessa 32", "capacity": "4 berths"})
        ),
    );
    let llm = ScriptedLlm::new(&[&reply]);
    let (agent, db) = setup(Flow::Owner, llm.clone()).await;

    let response = agent
        .process_turn(TurnRequest::new("Ben, Contessa 32 Saltwhistle").with_identity("owner-1"))
        .await
        .unwrap();

    assert_eq!(llm.calls(), 1);
    assert_eq!(response.step, OnboardingStep::AddJourney);
    assert!(response.entities.profile_created && response.entities.boat_created);
    assert!(response.message.content.starts_with("Your boat is saved."));

    let boats = db.list_boats_by_owner("owner-1").await.unwrap();
    assert_eq!(boats.len(), 1);
    assert_eq!(boats[0].capacity, Some(4));
}

#[tokio::test]
async fn repeated_create_in_one_response_keeps_one_row() {
    let boat = json!({"name": "Saltwhistle", "make_model": "Contessa 32"});
    let reply = format!("{}\n{}", call("create_boat", boat.clone()), call("create_boat", boat));
    let llm = ScriptedLlm::new(&[&reply]);
    let (agent, db) = setup(Flow::Owner, llm).await;
    seed_owner_profile(&db, "owner-1").await;

    let response = agent
        .process_turn(TurnRequest::new("Saltwhistle").with_identity("owner-1"))
        .await
        .unwrap();

    assert_eq!(db.list_boats_by_owner("owner-1").await.unwrap().len(), 1);
    let results = response.message.metadata.unwrap().tool_results;
    assert_eq!(results.len(), 2);
    assert!(results[0].is_success());
    assert!(results[1].error.as_deref().unwrap().contains("not available"));
}

#[tokio::test]
async fn step_violation_is_fed_back_and_loop_continues() {
    let first = call("create_boat", json!({"name": "Saltwhistle"}));
    let llm = ScriptedLlm::new(&[&first, "Before the boat, what's your name?"]);
    let (agent, db) = setup(Flow::Owner, llm.clone()).await;

    let response = agent
        .process_turn(TurnRequest::new("I own Saltwhistle").with_identity("owner-1"))
        .await
        .unwrap();

    assert_eq!(llm.calls(), 2);
    assert_eq!(response.message.content, "Before the boat, what's your name?");
    assert_eq!(response.step, OnboardingStep::CreateProfile);
    assert!(db.list_boats_by_owner("owner-1").await.unwrap().is_empty());

    let transcript = &llm.requests.lock().unwrap()[1].messages;
    let fed_back = &transcript.last().unwrap().content;
    assert!(fed_back.contains("ERROR"));
    assert!(fed_back.contains("not available in the current step"));
}

#[tokio::test]
async fn undecodable_block_next_to_valid_call_is_reported() {
    let first = format!(
        "{}\n```tool_call\n{{\"name\": \"create_boat\", \"arguments\": {{\"name\": \n```",
        call("update_user_profile", json!({"full_name": "Ben Halyard"}))
    );
    let llm = ScriptedLlm::new(&[&first, "Noted. What is your boat called?"]);
    let (agent, db) = setup(Flow::Owner, llm.clone()).await;
    seed_owner_profile(&db, "owner-1").await;

    let response = agent
        .process_turn(TurnRequest::new("I'm Ben").with_identity("owner-1"))
        .await
        .unwrap();

    assert_eq!(llm.calls(), 2);
    assert_eq!(response.message.content, "Noted. What is your boat called?");
    let profile = db.get_profile_by_user("owner-1").await.unwrap().unwrap();
    assert_eq!(profile.full_name.as_deref(), Some("Ben Halyard"));

    let transcript = &llm.requests.lock().unwrap()[1].messages;
    let fed_back = &transcript.last().unwrap().content;
    assert!(fed_back.contains("update_user_profile"));
    assert!(fed_back.contains("Could not parse tool call: 1 tool_call block(s)"));
}

#[tokio::test]
async fn missing_required_field_is_not_reported_as_success() {
    let first = call("create_boat", json!({"make_model": "Contessa 32"}));
    let llm = ScriptedLlm::new(&[&first, "What is your boat called?"]);
    let (agent, db) = setup(Flow::Owner, llm.clone()).await;
    seed_owner_profile(&db, "owner-1").await;

    let response = agent
        .process_turn(TurnRequest::new("It's a Contessa 32").with_identity("owner-1"))
        .await
        .unwrap();

    let metadata = response.message.metadata.unwrap();
    let error = metadata.tool_results[0].error.as_deref().unwrap();
    assert!(error.contains("name"), "{error}");
    assert!(!response.entities.boat_created);
    assert_eq!(response.step, OnboardingStep::AddBoat);
    assert_eq!(response.message.content, "What is your boat called?");
    assert!(db.list_boats_by_owner("owner-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn false_claims_are_nudged_at_most_twice() {
    let llm = ScriptedLlm::repeating("Your boat Saltwhistle has been saved!");
    let (agent, db) = setup(Flow::Owner, llm.clone()).await;
    seed_owner_profile(&db, "owner-1").await;

    let response = agent
        .process_turn(TurnRequest::new("Saltwhistle, a Contessa 32").with_identity("owner-1"))
        .await
        .unwrap();

    let synthetic = response.message.metadata.unwrap().synthetic_messages;
    let nudges = synthetic
        .iter()
        .filter(|m| m.contains("no create_boat call was made"))
        .count();
    assert_eq!(nudges, 2);
    assert!(synthetic.last().unwrap().contains("already exists"));
    // Two nudges, one assume-exists, then the claim is accepted.
    assert_eq!(llm.calls(), 4);
    assert!(!response.exhausted);
    assert!(db.list_boats_by_owner("owner-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn iteration_cap_ends_turn() {
    let reply = format!("Let me check.\n{}", call("get_skill_definitions", json!({})));
    let llm = ScriptedLlm::repeating(&reply);
    let (agent, _db) = setup(Flow::Prospect, llm.clone()).await;

    let response = agent
        .process_turn(TurnRequest::new("What skills matter?"))
        .await
        .unwrap();

    assert_eq!(llm.calls(), OnboardingConfig::default().prospect_max_iterations);
    assert!(response.exhausted);
    assert_eq!(response.message.content, "Let me check.");
}

#[tokio::test]
async fn malformed_call_gets_corrective_retry() {
    let broken = "Saving now.\n```tool_call\n{\"name\": \"create_profile\", \"arguments\": {\"full_name\": }\n```";
    let fixed = call("create_profile", json!({"full_name": "Ana Ribeiro"}));
    let llm = ScriptedLlm::new(&[broken, &fixed]);
    let (agent, db) = setup(Flow::Prospect, llm.clone()).await;

    let response = agent
        .process_turn(TurnRequest::new("I'm Ana").with_identity("crew-1"))
        .await
        .unwrap();

    assert_eq!(llm.calls(), 2);
    let metadata = response.message.metadata.unwrap();
    assert!(metadata.synthetic_messages[0].contains("no placeholder values"));
    assert_eq!(response.step, OnboardingStep::Completed);
    let profile = db.get_profile_by_user("crew-1").await.unwrap().unwrap();
    assert!(profile.has_role(UserRole::Crew));
}

#[tokio::test]
async fn placeholder_values_never_reach_the_store() {
    let first = call("create_profile", json!({"full_name": "<user's name>"}));
    let llm = ScriptedLlm::new(&[&first, "What's your name?"]);
    let (agent, db) = setup(Flow::Prospect, llm).await;

    let response = agent
        .process_turn(TurnRequest::new("Hi").with_identity("crew-1"))
        .await
        .unwrap();

    assert_eq!(response.message.content, "What's your name?");
    assert!(db.get_profile_by_user("crew-1").await.unwrap().is_none());
}

#[tokio::test]
async fn anonymous_prospect_searches_and_is_asked_to_sign_up() {
    let search = call("search_journeys", json!({"region": "Caribbean", "experience_level": "novice"}));
    let sign_up = call("suggest_sign_up", json!({"reason": "Save your Caribbean picks"}));
    let llm = ScriptedLlm::new(&[&search, &sign_up, "Sign up and I'll keep an eye out for you."]);
    let (agent, _db) = setup(Flow::Prospect, llm.clone()).await;

    let mut request = TurnRequest::new("I'd love to sail the Caribbean");
    request.stored_context = BTreeMap::from([(
        "What I want from a skipper".to_string(),
        "Patient, safety-minded".to_string(),
    )]);
    let response = agent.process_turn(request).await.unwrap();

    assert_eq!(response.step, OnboardingStep::SignUp);
    assert_eq!(llm.calls(), 3);
    let results = response.message.metadata.unwrap().tool_results;
    assert_eq!(results[0].result.as_ref().unwrap()["count"], 0);
    assert_eq!(results[1].result.as_ref().unwrap()["sign_up_suggested"], true);

    let prompt = llm.system_prompt(0);
    assert!(prompt.contains("### What I want from a skipper\nPatient, safety-minded"));
    assert!(prompt.contains("### suggest_sign_up"));
    assert!(!prompt.contains("### create_profile"));
}

#[tokio::test]
async fn approved_action_bypasses_model() {
    let llm = ScriptedLlm::new(&[]);
    let (agent, db) = setup(Flow::Owner, llm.clone()).await;
    seed_owner_profile(&db, "owner-1").await;
    let boat = crew_assist::onboarding::model::Boat::new("owner-1", "Saltwhistle");
    db.insert_boat(&boat).await.unwrap();

    let mut request = TurnRequest::new("Yes, save it").with_identity("owner-1");
    request.approved_action = Some(ApprovedAction {
        tool_name: "create_journey".to_string(),
        arguments: json!({
            "name": "Biscay crossing",
            "start_date": "2026-06-01",
            "end_date": "2026-06-05"
        }),
    });
    let response = agent.process_turn(request).await.unwrap();

    assert_eq!(llm.calls(), 0);
    assert!(response.message.content.starts_with("Done."));
    assert!(response.entities.journey_created);
    assert_eq!(response.step, OnboardingStep::Completed);
    assert_eq!(db.list_journeys_by_owner("owner-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn approved_action_still_respects_step_table() {
    let llm = ScriptedLlm::new(&[]);
    let (agent, db) = setup(Flow::Owner, llm.clone()).await;

    let mut request = TurnRequest::new("Yes").with_identity("owner-1");
    request.approved_action = Some(ApprovedAction {
        tool_name: "create_boat".to_string(),
        arguments: json!({"name": "Saltwhistle"}),
    });
    let response = agent.process_turn(request).await.unwrap();

    assert_eq!(llm.calls(), 0);
    assert!(response.message.content.starts_with("I couldn't complete that"));
    assert!(db.list_boats_by_owner("owner-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn conversation_is_persisted_and_rehydrated() {
    let llm = ScriptedLlm::new(&["Where would you like to sail?", "The Med is lovely."]);
    let (agent, db) = setup(Flow::Prospect, llm.clone()).await;

    let first = agent
        .process_turn(TurnRequest::new("Hi there"))
        .await
        .unwrap();
    let session = first.session_id;
    agent
        .process_turn(TurnRequest::new("The Mediterranean").with_session(session))
        .await
        .unwrap();

    let stored = db.list_conversation_messages(session).await.unwrap();
    let roles: Vec<&str> = stored.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, vec!["user", "assistant", "user", "assistant"]);

    // Second call saw the first exchange plus the new message.
    let second = &llm.requests.lock().unwrap()[1];
    let contents: Vec<&str> = second.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec!["Hi there", "Where would you like to sail?", "The Mediterranean"]
    );
}

#[tokio::test]
async fn model_failure_is_an_error() {
    let llm = ScriptedLlm::new(&[]);
    let (agent, _db) = setup(Flow::Prospect, llm).await;
    let err = agent
        .process_turn(TurnRequest::new("Hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Llm(_)));
}
