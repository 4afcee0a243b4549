//! Collaborator doubles shared by the unit tests.

use std::{collections::VecDeque, sync::Mutex};

use async_trait::async_trait;

use crate::workflow::actions::{ChatPoster, DeliveryError, HttpCaller, HttpResponse, MailSender, RequestBody, webhook::HttpMethod};

/// Mail sender that records every message, or always fails with one error.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(String, String, String)>>,
    failure: Option<DeliveryError>,
}

impl RecordingMailer {
    pub fn failing(err: DeliveryError) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failure: Some(err),
        }
    }

    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailSender for RecordingMailer {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), DeliveryError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        self.sent.lock().unwrap().push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

/// Chat poster that records every post, or always fails with one error.
#[derive(Default)]
pub struct RecordingPoster {
    posts: Mutex<Vec<(String, String)>>,
    failure: Option<DeliveryError>,
}

impl RecordingPoster {
    pub fn failing(err: DeliveryError) -> Self {
        Self {
            posts: Mutex::new(Vec::new()),
            failure: Some(err),
        }
    }

    pub fn posts(&self) -> Vec<(String, String)> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatPoster for RecordingPoster {
    async fn post(
        &self,
        channel: &str,
        message: &str,
    ) -> Result<(), DeliveryError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        self.posts.lock().unwrap().push((channel.to_string(), message.to_string()));
        Ok(())
    }
}

pub type RecordedCall = (HttpMethod, String, Vec<(String, String)>, Option<RequestBody>);

/// HTTP caller answering from a script of statuses or errors.
///
/// Once the script runs out the last entry repeats; an empty script answers 200.
pub struct ScriptedHttp {
    script: Mutex<VecDeque<Result<u16, DeliveryError>>>,
    last: Mutex<Result<u16, DeliveryError>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedHttp {
    pub fn new(script: Vec<Result<u16, DeliveryError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(Ok(200)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpCaller for ScriptedHttp {
    async fn call(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &[(String, String)],
        body: Option<RequestBody>,
    ) -> Result<HttpResponse, DeliveryError> {
        self.calls.lock().unwrap().push((method, url.to_string(), headers.to_vec(), body));

        let next = {
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.script.lock().unwrap().pop_front() {
                *last = next;
            }
            last.clone()
        };
        next.map(|status| HttpResponse {
            status,
            body: format!("status {}", status),
        })
    }
}
