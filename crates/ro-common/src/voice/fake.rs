use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{CreateAgentRequest, CreateCallRequest, ProviderError, VoiceProvider};

#[derive(Default)]
struct Calls {
    in_flight: usize,
    max_in_flight: usize,
    waves: Vec<usize>,
    placed: Vec<CreateCallRequest>,
    agents: Vec<CreateAgentRequest>,
}

/// Scriptable in-process provider. Call ids are `call-<to_number>`.
///
/// A new "wave" starts whenever a call begins while nothing else is in
/// flight, which lets tests observe the dispatcher's chunk barrier.
#[derive(Default)]
pub struct FakeVoiceProvider {
    calls: Mutex<Calls>,
    failing_numbers: HashSet<String>,
    call_latency: Duration,
    fail_agent_creation: bool,
}

impl FakeVoiceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.call_latency = latency;
        self
    }

    pub fn failing_for(mut self, number: &str) -> Self {
        self.failing_numbers.insert(number.to_string());
        self
    }

    pub fn failing_agent_creation(mut self) -> Self {
        self.fail_agent_creation = true;
        self
    }

    pub fn call_id_for(to_number: &str) -> String {
        format!("call-{to_number}")
    }

    fn calls(&self) -> MutexGuard<'_, Calls> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn call_count(&self) -> usize {
        self.calls().placed.len()
    }

    pub fn dialed_numbers(&self) -> Vec<String> {
        self.calls()
            .placed
            .iter()
            .map(|c| c.to_number.clone())
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.calls().max_in_flight
    }

    pub fn waves(&self) -> Vec<usize> {
        self.calls().waves.clone()
    }

    pub fn agents_created(&self) -> usize {
        self.calls().agents.len()
    }
}

#[async_trait]
impl VoiceProvider for FakeVoiceProvider {
    async fn create_agent(&self, request: &CreateAgentRequest) -> Result<String, ProviderError> {
        if self.fail_agent_creation {
            return Err(ProviderError::Status {
                status: 500,
                body: "agent creation failed".into(),
            });
        }
        let mut calls = self.calls();
        calls.agents.push(request.clone());
        Ok(format!("agent-{}", calls.agents.len()))
    }

    async fn create_call(&self, request: &CreateCallRequest) -> Result<String, ProviderError> {
        {
            let mut calls = self.calls();
            if calls.in_flight == 0 {
                calls.waves.push(0);
            }
            if let Some(wave) = calls.waves.last_mut() {
                *wave += 1;
            }
            calls.in_flight += 1;
            calls.max_in_flight = calls.max_in_flight.max(calls.in_flight);
            calls.placed.push(request.clone());
        }

        if !self.call_latency.is_zero() {
            tokio::time::sleep(self.call_latency).await;
        }

        self.calls().in_flight -= 1;

        if self.failing_numbers.contains(&request.to_number) {
            return Err(ProviderError::Status {
                status: 503,
                body: "provider unavailable".into(),
            });
        }
        Ok(Self::call_id_for(&request.to_number))
    }
}
