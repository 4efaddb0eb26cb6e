//! Scripted [`TextGenerationService`] for pipeline tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::llm::{GenerateRequest, GenerateResponse, ServiceError, TextGenerationService};

pub const HEAT_ISLAND_QUERY: &str = "What are the causes and effects of urban heat islands?";

pub const HEAT_ISLAND_QUESTIONS: [&str; 3] = [
    "What physical factors cause urban heat islands?",
    "What are the human-health effects of urban heat islands?",
    "What mitigation strategies reduce urban heat island intensity?",
];

pub const HEAT_ISLAND_DECOMPOSITION: &str = r#"{"questions": [
    "What physical factors cause urban heat islands?",
    "What are the human-health effects of urban heat islands?",
    "What mitigation strategies reduce urban heat island intensity?"
]}"#;

pub const HEAT_ISLAND_SYNTHESIS: &str = r#"```json
{
  "synthesis": "Urban heat islands arise from heat-absorbing surfaces and lost vegetation, raise heat-related illness, and are reduced by cool roofs and urban greening.",
  "key_insights": [
    "Dark impervious surfaces store and re-radiate heat.",
    "Heat exposure hits the elderly hardest.",
    "Greening and reflective roofs lower surface temperatures."
  ]
}
```"#;

pub struct FakeService {
    decomposition: String,
    synthesis: String,
    questions: Vec<String>,
    delays: Vec<Duration>,
    failing_stage: Option<&'static str>,
    failing_answer_call: Option<usize>,
    failing_question: Option<usize>,
    requests: Mutex<Vec<GenerateRequest>>,
    answer_responses: Mutex<Vec<String>>,
    completion_order: Mutex<Vec<usize>>,
    answer_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeService {
    pub fn new(decomposition: &str, synthesis: &str) -> Self {
        let questions = serde_json::from_str::<serde_json::Value>(
            crate::pipeline::contract::extract_payload(decomposition),
        )
        .ok()
        .and_then(|v| serde_json::from_value::<Vec<String>>(v["questions"].clone()).ok())
        .unwrap_or_default();

        Self {
            decomposition: decomposition.to_string(),
            synthesis: synthesis.to_string(),
            questions,
            delays: Vec::new(),
            failing_stage: None,
            failing_answer_call: None,
            failing_question: None,
            requests: Mutex::new(Vec::new()),
            answer_responses: Mutex::new(Vec::new()),
            completion_order: Mutex::new(Vec::new()),
            answer_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Per-question latency for answer calls, indexed by decomposition order.
    pub fn with_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delays = delays;
        self
    }

    pub fn failing_stage(mut self, stage: &'static str) -> Self {
        self.failing_stage = Some(stage);
        self
    }

    /// Fails the n-th answer call (1-based, in call order).
    pub fn failing_answer_call(mut self, call: usize) -> Self {
        self.failing_answer_call = Some(call);
        self
    }

    pub fn failing_question(mut self, index: usize) -> Self {
        self.failing_question = Some(index);
        self
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn answer_responses(&self) -> Vec<String> {
        self.answer_responses.lock().unwrap().clone()
    }

    pub fn completion_order(&self) -> Vec<usize> {
        self.completion_order.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn injected(message: String) -> ServiceError {
        ServiceError::Request {
            provider: "fake".to_string(),
            kind: "server_error",
            message,
        }
    }

    async fn answer(&self, req: &GenerateRequest) -> Result<String, ServiceError> {
        let call = self.answer_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let index = self
            .questions
            .iter()
            .position(|q| req.prompt.contains(q.as_str()));

        if let Some(delay) = index.and_then(|i| self.delays.get(i))
            && !delay.is_zero()
        {
            tokio::time::sleep(*delay).await;
        }

        if self.failing_answer_call == Some(call)
            || (index.is_some() && index == self.failing_question)
        {
            return Err(Self::injected(format!("injected failure on answer call {call}")));
        }

        let answer = match index {
            Some(i) => format!("[call-{call}] answer to question {i}"),
            None => format!("[call-{call}] answer to an unknown question"),
        };
        self.answer_responses.lock().unwrap().push(answer.clone());
        if let Some(i) = index {
            self.completion_order.lock().unwrap().push(i);
        }
        Ok(format!("\n  {answer}  \n"))
    }
}

#[async_trait::async_trait]
impl TextGenerationService for FakeService {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ServiceError> {
        self.requests.lock().unwrap().push(req.clone());

        if self.failing_stage == Some(req.stage) {
            return Err(Self::injected(format!("injected {} failure", req.stage)));
        }

        let content = match req.stage {
            "decompose" => self.decomposition.clone(),
            "synthesize" => self.synthesis.clone(),
            "answer" => self.answer(req).await?,
            "refine" => format!("Refined: {}", req.prompt.lines().last().unwrap_or_default()),
            other => return Err(Self::injected(format!("unexpected stage {other}"))),
        };

        Ok(GenerateResponse {
            content,
            model: req.model.clone(),
            provider: "fake".to_string(),
            ..Default::default()
        })
    }
}
