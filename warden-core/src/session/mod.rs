//! Speech-recognition session control.
//!
//! One session per active engagement on a device: it owns an
//! `UtteranceSegmenter`, drives the decode step for every finalized
//! segment, and scores the text for emergency keywords. A decode failure
//! tears down the failing session only — other sessions are unaffected.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::decode::DecoderHandle;
use crate::error::{Result, WardenError};
use crate::eval::{best_match, KeywordMatcher};
use crate::vad::{SegmenterConfig, SessionSummary, SpeechSegment, UtteranceSegmenter};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Stopped,
}

/// Read-only view of a session for the status surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub device_id: String,
    pub language: String,
    pub vad_enabled: bool,
    pub state: SessionState,
    pub segment_count: usize,
    pub last_text: Option<String>,
}

/// One decoded, keyword-scored utterance ready for ingest.
#[derive(Debug, Clone)]
pub struct FinalizedUtterance {
    pub device_id: String,
    pub session_id: String,
    pub text: String,
    /// Offset of the speech start within the session's audio stream.
    pub start_offset_secs: f64,
    pub duration_secs: f64,
    pub timestamp: DateTime<Utc>,
    pub is_emergency: bool,
    pub keywords: Vec<String>,
}

/// Outcome of stopping a session: any force-finalized utterance plus the
/// terminal summary.
#[derive(Debug)]
pub struct SessionStop {
    pub utterances: Vec<FinalizedUtterance>,
    pub summary: SessionSummary,
}

struct SpeechSession {
    device_id: String,
    language: String,
    vad_enabled: bool,
    segmenter: UtteranceSegmenter,
    segment_count: usize,
    last_text: Option<String>,
}

/// Owns all active sessions. `Send + Sync`; interior mutability only.
pub struct SessionManager {
    decoder: DecoderHandle,
    matcher: KeywordMatcher,
    segmenter_config: SegmenterConfig,
    /// Recognition-quality reference phrases; when non-empty, every decode
    /// is scored against the closest one (observability only).
    reference_corpus: Vec<String>,
    sessions: Mutex<HashMap<String, SpeechSession>>,
}

impl SessionManager {
    pub fn new(
        decoder: DecoderHandle,
        matcher: KeywordMatcher,
        segmenter_config: SegmenterConfig,
        reference_corpus: Vec<String>,
    ) -> Self {
        Self {
            decoder,
            matcher,
            segmenter_config,
            reference_corpus,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Create a session and return its opaque token.
    pub fn start(&self, device_id: &str, language: &str, vad_enabled: bool) -> Result<String> {
        let session_id = new_session_token();
        let mut segmenter = UtteranceSegmenter::with_energy_vad(self.segmenter_config.clone());
        if vad_enabled {
            segmenter.start()?;
        }

        self.sessions.lock().insert(
            session_id.clone(),
            SpeechSession {
                device_id: device_id.to_string(),
                language: language.to_string(),
                vad_enabled,
                segmenter,
                segment_count: 0,
                last_text: None,
            },
        );
        info!(
            session_id = %session_id,
            device_id = %device_id,
            language = %language,
            vad_enabled,
            "session started"
        );
        Ok(session_id)
    }

    /// Feed raw audio into a session; returns utterances finalized by this
    /// frame, decoded and keyword-scored.
    ///
    /// # Errors
    /// - [`WardenError::SessionNotFound`] for an unknown session.
    /// - [`WardenError::VadDisabled`] when the session was started without
    ///   segmentation.
    /// - [`WardenError::Decode`] when the engine fails; the session is
    ///   torn down first.
    pub fn push_frame(&self, session_id: &str, samples: &[f32]) -> Result<Vec<FinalizedUtterance>> {
        let (segments, device_id) = {
            let mut sessions = self.sessions.lock();
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| WardenError::SessionNotFound(session_id.to_string()))?;
            if !session.vad_enabled {
                return Err(WardenError::VadDisabled);
            }
            (
                session.segmenter.push_frame(samples)?,
                session.device_id.clone(),
            )
        };

        // Decode outside the sessions lock: the engine can be slow and
        // other sessions must keep streaming meanwhile.
        let utterances = self.decode_segments(session_id, &device_id, segments)?;
        self.apply_results(session_id, &utterances);
        Ok(utterances)
    }

    /// Stop a session: force-finalize buffered speech, decode it, return
    /// the terminal summary, and destroy the session.
    pub fn stop(&self, session_id: &str) -> Result<SessionStop> {
        let (outcome, device_id) = {
            let mut sessions = self.sessions.lock();
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| WardenError::SessionNotFound(session_id.to_string()))?;
            let outcome = if session.vad_enabled {
                Some(session.segmenter.stop()?)
            } else {
                None
            };
            (outcome, session.device_id.clone())
        };

        let mut utterances = Vec::new();
        let mut summary = SessionSummary::default();
        if let Some(outcome) = outcome {
            summary = outcome.summary;
            let segments: Vec<SpeechSegment> = outcome.segment.into_iter().collect();
            match self.decode_segments(session_id, &device_id, segments) {
                Ok(mut decoded) => utterances.append(&mut decoded),
                Err(e) => {
                    // The session is being destroyed either way; the
                    // trailing buffer is lost, the summary still stands.
                    warn!(
                        session_id = %session_id,
                        error = %e,
                        "decode failed during stop — trailing segment dropped"
                    );
                }
            }
        }

        let removed = self.sessions.lock().remove(session_id);
        if let Some(session) = removed {
            info!(
                session_id = %session_id,
                device_id = %session.device_id,
                segment_count = summary.segment_count,
                total_speech_secs = summary.total_speech_secs,
                "session stopped"
            );
        }
        Ok(SessionStop {
            utterances,
            summary,
        })
    }

    /// Current snapshot of a session.
    pub fn status(&self, session_id: &str) -> Result<SessionSnapshot> {
        let sessions = self.sessions.lock();
        let session = sessions
            .get(session_id)
            .ok_or_else(|| WardenError::SessionNotFound(session_id.to_string()))?;
        Ok(SessionSnapshot {
            session_id: session_id.to_string(),
            device_id: session.device_id.clone(),
            language: session.language.clone(),
            vad_enabled: session.vad_enabled,
            state: SessionState::Active,
            segment_count: session.segment_count,
            last_text: session.last_text.clone(),
        })
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    fn decode_segments(
        &self,
        session_id: &str,
        device_id: &str,
        segments: Vec<SpeechSegment>,
    ) -> Result<Vec<FinalizedUtterance>> {
        let mut utterances = Vec::with_capacity(segments.len());
        for segment in segments {
            let text = {
                let mut decoder = self.decoder.0.lock();
                match decoder.decode(&segment.audio) {
                    Ok(text) => text,
                    Err(e) => {
                        // Fatal to this session only.
                        self.sessions.lock().remove(session_id);
                        warn!(
                            session_id = %session_id,
                            error = %e,
                            "decode failed — session torn down"
                        );
                        return Err(WardenError::Decode(e.to_string()));
                    }
                }
            };

            if !self.reference_corpus.is_empty() {
                if let Some(matched) = best_match(&text, &self.reference_corpus) {
                    debug!(
                        session_id = %session_id,
                        reference = %matched.matched_reference,
                        similarity = matched.similarity,
                        character_accuracy = matched.character_accuracy,
                        "recognition scored against corpus"
                    );
                }
            }

            let keywords = self.matcher.detect(&text);
            let is_emergency = !keywords.is_empty();
            debug!(
                session_id = %session_id,
                text = %text,
                is_emergency,
                "utterance decoded"
            );
            utterances.push(FinalizedUtterance {
                device_id: device_id.to_string(),
                session_id: session_id.to_string(),
                text,
                start_offset_secs: segment.start_offset_secs,
                duration_secs: segment.duration_secs(),
                timestamp: Utc::now(),
                is_emergency,
                keywords,
            });
        }
        Ok(utterances)
    }

    fn apply_results(&self, session_id: &str, utterances: &[FinalizedUtterance]) {
        if utterances.is_empty() {
            return;
        }
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(session_id) {
            session.segment_count += utterances.len();
            if let Some(last) = utterances.last() {
                session.last_text = Some(last.text.clone());
            }
        }
    }
}

fn new_session_token() -> String {
    let token: u128 = rand::thread_rng().gen();
    format!("{token:032x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioFrame;
    use crate::decode::SpeechDecoder;

    struct ScriptedDecoder {
        text: String,
        fail: bool,
    }

    impl SpeechDecoder for ScriptedDecoder {
        fn decode(&mut self, _audio: &AudioFrame) -> Result<String> {
            if self.fail {
                return Err(WardenError::Decode("engine unavailable".into()));
            }
            Ok(self.text.clone())
        }

        fn reset(&mut self) {}
    }

    fn manager(text: &str, fail: bool) -> SessionManager {
        SessionManager::new(
            DecoderHandle::new(ScriptedDecoder {
                text: text.into(),
                fail,
            }),
            KeywordMatcher::default(),
            SegmenterConfig::default(),
            Vec::new(),
        )
    }

    fn speech(secs: f32) -> Vec<f32> {
        vec![0.5f32; (secs * 16_000.0) as usize]
    }

    fn silence(secs: f32) -> Vec<f32> {
        vec![0.0f32; (secs * 16_000.0) as usize]
    }

    #[test]
    fn utterance_flows_through_decode_and_triage() {
        let mgr = manager("도와줘 사람이 쓰러졌어", false);
        let session = mgr.start("dev-1", "ko", true).unwrap();

        let mut utterances = Vec::new();
        utterances.extend(mgr.push_frame(&session, &speech(1.0)).unwrap());
        utterances.extend(mgr.push_frame(&session, &silence(2.0)).unwrap());

        assert_eq!(utterances.len(), 1);
        let utt = &utterances[0];
        assert_eq!(utt.device_id, "dev-1");
        assert_eq!(utt.session_id, session);
        assert!(utt.is_emergency);
        assert!(utt.keywords.contains(&"도와줘".to_string()));

        let snapshot = mgr.status(&session).unwrap();
        assert_eq!(snapshot.segment_count, 1);
        assert_eq!(snapshot.last_text.as_deref(), Some("도와줘 사람이 쓰러졌어"));
    }

    #[test]
    fn decode_failure_tears_down_only_that_session() {
        let mgr = manager("ok", true);
        let failing = mgr.start("dev-1", "ko", true).unwrap();
        let healthy_mgr = manager("ok", false);
        let healthy = healthy_mgr.start("dev-2", "ko", true).unwrap();

        mgr.push_frame(&failing, &speech(1.0)).unwrap();
        let err = mgr.push_frame(&failing, &silence(2.0)).unwrap_err();
        assert!(matches!(err, WardenError::Decode(_)));
        assert!(matches!(
            mgr.status(&failing),
            Err(WardenError::SessionNotFound(_))
        ));

        // A different session keeps working.
        healthy_mgr.push_frame(&healthy, &speech(1.0)).unwrap();
        assert!(healthy_mgr.status(&healthy).is_ok());
    }

    #[test]
    fn stop_force_finalizes_and_destroys_the_session() {
        let mgr = manager("마지막 문장", false);
        let session = mgr.start("dev-1", "ko", true).unwrap();
        mgr.push_frame(&session, &speech(1.0)).unwrap();

        let stop = mgr.stop(&session).unwrap();
        assert_eq!(stop.utterances.len(), 1);
        assert_eq!(stop.summary.segment_count, 1);
        assert!(matches!(
            mgr.status(&session),
            Err(WardenError::SessionNotFound(_))
        ));
    }

    #[test]
    fn stop_with_no_speech_returns_empty_summary() {
        let mgr = manager("ok", false);
        let session = mgr.start("dev-1", "ko", true).unwrap();

        let stop = mgr.stop(&session).unwrap();
        assert!(stop.utterances.is_empty());
        assert_eq!(stop.summary, SessionSummary::default());
    }

    #[test]
    fn vad_disabled_session_rejects_frames() {
        let mgr = manager("ok", false);
        let session = mgr.start("dev-1", "ko", false).unwrap();
        assert!(matches!(
            mgr.push_frame(&session, &speech(0.1)),
            Err(WardenError::VadDisabled)
        ));
        // But it still stops cleanly with an empty summary.
        let stop = mgr.stop(&session).unwrap();
        assert_eq!(stop.summary, SessionSummary::default());
    }

    #[test]
    fn unknown_session_is_a_typed_error() {
        let mgr = manager("ok", false);
        assert!(matches!(
            mgr.push_frame("missing", &speech(0.1)),
            Err(WardenError::SessionNotFound(_))
        ));
        assert!(matches!(
            mgr.stop("missing"),
            Err(WardenError::SessionNotFound(_))
        ));
    }

    #[test]
    fn session_tokens_are_opaque_and_unique() {
        let mgr = manager("ok", false);
        let a = mgr.start("dev-1", "ko", true).unwrap();
        let b = mgr.start("dev-1", "ko", true).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert_eq!(mgr.active_sessions(), 2);
    }
}
