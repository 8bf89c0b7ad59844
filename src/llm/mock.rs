//! Scripted backend for tests: replays queued responses and records calls.

use std::collections::VecDeque;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::llm::gemini::OutputSegment;
use crate::llm::interactions::{CreateInteraction, Interaction, InteractionBackend, InteractionStatus};

#[derive(Debug, Default)]
pub struct ScriptedBackend {
    creates: Mutex<VecDeque<Result<Interaction, String>>>,
    gets: Mutex<VecDeque<Result<Interaction, String>>>,
    generations: Mutex<VecDeque<Result<Vec<OutputSegment>, String>>>,
    pub created: Mutex<Vec<CreateInteraction>>,
    pub fetched: Mutex<Vec<String>>,
}

pub fn interaction(id: &str, status: &str, text: Option<&str>) -> Interaction {
    Interaction {
        id: id.to_string(),
        status: InteractionStatus::parse(status),
        outputs: text
            .map(|text| vec![OutputSegment::Text(text.to_string())])
            .unwrap_or_default(),
        error: None,
    }
}

impl ScriptedBackend {
    pub fn push_create(&self, response: Result<Interaction, &str>) -> &Self {
        self.creates
            .lock()
            .push_back(response.map_err(str::to_string));
        self
    }

    pub fn push_get(&self, response: Result<Interaction, &str>) -> &Self {
        self.gets
            .lock()
            .push_back(response.map_err(str::to_string));
        self
    }

    pub fn push_generation(&self, response: Result<Vec<OutputSegment>, &str>) -> &Self {
        self.generations
            .lock()
            .push_back(response.map_err(str::to_string));
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetched.lock().len()
    }

    pub fn created_requests(&self) -> Vec<CreateInteraction> {
        self.created.lock().clone()
    }
}

#[async_trait]
impl InteractionBackend for ScriptedBackend {
    async fn create(&self, request: CreateInteraction) -> Result<Interaction> {
        self.created.lock().push(request);
        match self.creates.lock().pop_front() {
            Some(response) => response.map_err(|message| anyhow!(message)),
            None => Err(anyhow!("no scripted create response")),
        }
    }

    async fn get(&self, id: &str) -> Result<Interaction> {
        self.fetched.lock().push(id.to_string());
        match self.gets.lock().pop_front() {
            Some(response) => response.map_err(|message| anyhow!(message)),
            None => Err(anyhow!("no scripted get response")),
        }
    }

    async fn generate(&self, _model: &str, _prompt: &str) -> Result<Vec<OutputSegment>> {
        match self.generations.lock().pop_front() {
            Some(response) => response.map_err(|message| anyhow!(message)),
            None => Err(anyhow!("no scripted generation")),
        }
    }
}
