//! Cloud streaming recognizer backend over gRPC.
//!
//! One `start_stream` call opens one StreamingRecognize RPC: the config
//! message goes first, then audio chunks as they arrive; interim and final
//! results come back on the event channel. Authentication is a bearer token
//! from the service-account [`TokenProvider`].

use async_trait::async_trait;
use tokio::sync::mpsc;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, ClientTlsConfig};
use tonic::Request;
use tracing::{debug, info, warn};

use crate::auth::TokenProvider;
use crate::{StreamEvent, StreamingAsrBackend, StreamingConfig, StreamingResult};

/// Generated Cloud Speech v1 client.
pub mod speech_proto {
    tonic::include_proto!("google.cloud.speech.v1");
}

use speech_proto::{
    recognition_config::AudioEncoding, speech_client::SpeechClient, RecognitionConfig,
    SpeechContext, StreamingRecognitionConfig, StreamingRecognizeRequest,
};

const SPEECH_ENDPOINT: &str = "https://speech.googleapis.com";
/// Telephony phrases the recognizer should bias toward.
const BUILTIN_PHRASE_HINTS: &[&str] = &[
    "もしもし",
    "こんにちは",
    "ありがとうございます",
    "お願いします",
    "失礼します",
    "担当者",
    "たんとうしゃ",
    "担当の者",
    "オペレーター",
];

pub struct GoogleStreamingBackend {
    tokens: TokenProvider,
    endpoint: String,
}

impl GoogleStreamingBackend {
    pub fn new(tokens: TokenProvider) -> Self {
        Self {
            tokens,
            endpoint: SPEECH_ENDPOINT.to_string(),
        }
    }

    /// Points the backend at a different endpoint (plaintext allowed), for
    /// tests against a local mock server.
    pub fn with_endpoint(tokens: TokenProvider, endpoint: String) -> Self {
        Self { tokens, endpoint }
    }

    async fn connect(&self) -> anyhow::Result<Channel> {
        let mut endpoint = Channel::from_shared(self.endpoint.clone())
            .map_err(|e| anyhow::anyhow!("invalid speech endpoint '{}': {e}", self.endpoint))?;
        if self.endpoint.starts_with("https://") {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_webpki_roots())
                .map_err(|e| anyhow::anyhow!("tls config failed: {e}"))?;
        }
        endpoint
            .connect()
            .await
            .map_err(|e| anyhow::anyhow!("failed to connect to '{}': {e}", self.endpoint))
    }

    fn pcm_i16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    fn make_config(&self, config: &StreamingConfig) -> RecognitionConfig {
        let mut phrases: Vec<String> = BUILTIN_PHRASE_HINTS
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        for hint in &config.phrase_hints {
            if !phrases.contains(hint) {
                phrases.push(hint.clone());
            }
        }
        RecognitionConfig {
            encoding: AudioEncoding::Linear16 as i32,
            sample_rate_hertz: config.sample_rate as i32,
            language_code: config.language_code.clone(),
            max_alternatives: 1,
            speech_contexts: vec![SpeechContext { phrases }],
            audio_channel_count: 1,
            enable_automatic_punctuation: true,
            // ja-JP has no dedicated streaming model; the enhanced default
            // is what the recognizer actually serves.
            model: String::new(),
            use_enhanced: true,
        }
    }
}

#[async_trait]
impl StreamingAsrBackend for GoogleStreamingBackend {
    async fn start_stream(
        &self,
        config: StreamingConfig,
    ) -> anyhow::Result<(mpsc::Sender<Vec<i16>>, mpsc::Receiver<StreamEvent>)> {
        let channel = self.connect().await?;
        let token = self.tokens.access_token().await?;
        let bearer: MetadataValue<_> = format!("Bearer {token}")
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid bearer token: {e}"))?;
        let mut client =
            SpeechClient::with_interceptor(channel, move |mut req: Request<()>| {
                req.metadata_mut().insert("authorization", bearer.clone());
                Ok(req)
            });

        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<i16>>(64);
        let (event_tx, event_rx) = mpsc::channel::<StreamEvent>(64);

        let streaming_config = StreamingRecognitionConfig {
            config: Some(self.make_config(&config)),
            single_utterance: false,
            interim_results: true,
        };

        let (grpc_tx, grpc_rx) = mpsc::channel::<StreamingRecognizeRequest>(64);
        grpc_tx
            .send(StreamingRecognizeRequest {
                streaming_request: Some(
                    speech_proto::streaming_recognize_request::StreamingRequest::StreamingConfig(
                        streaming_config,
                    ),
                ),
            })
            .await
            .map_err(|_| anyhow::anyhow!("failed to queue streaming config"))?;

        // Forward audio chunks into the RPC. An empty chunk becomes an empty
        // audio_content frame (keepalive); dropping the sender ends the
        // audio side.
        let grpc_tx_audio = grpc_tx.clone();
        tokio::spawn(async move {
            while let Some(chunk) = audio_rx.recv().await {
                let msg = StreamingRecognizeRequest {
                    streaming_request: Some(
                        speech_proto::streaming_recognize_request::StreamingRequest::AudioContent(
                            Self::pcm_i16_to_le_bytes(&chunk),
                        ),
                    ),
                };
                if grpc_tx_audio.send(msg).await.is_err() {
                    break;
                }
            }
            drop(grpc_tx_audio);
            debug!("audio forwarding to speech stream complete");
        });
        drop(grpc_tx);

        let request_stream = tokio_stream::wrappers::ReceiverStream::new(grpc_rx);
        let mut response_stream = client
            .streaming_recognize(request_stream)
            .await
            .map_err(|e| anyhow::anyhow!("StreamingRecognize RPC failed: {e}"))?
            .into_inner();

        tokio::spawn(async move {
            loop {
                match response_stream.message().await {
                    Ok(Some(response)) => {
                        if let Some(err) = response.error {
                            warn!(code = err.code, message = %err.message, "speech stream error");
                            let _ = event_tx
                                .send(StreamEvent::Closed {
                                    error: Some(format!("{} (code {})", err.message, err.code)),
                                })
                                .await;
                            return;
                        }
                        for result in response.results {
                            if let Some(alt) = result.alternatives.first() {
                                let event = StreamEvent::Result(StreamingResult {
                                    text: alt.transcript.clone(),
                                    is_final: result.is_final,
                                    confidence: (alt.confidence > 0.0)
                                        .then_some(alt.confidence as f64),
                                });
                                if event_tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Ok(None) => {
                        info!("speech stream closed by server");
                        let _ = event_tx.send(StreamEvent::Closed { error: None }).await;
                        return;
                    }
                    Err(status) => {
                        warn!(%status, "speech stream terminated with status");
                        let _ = event_tx
                            .send(StreamEvent::Closed {
                                error: Some(status.to_string()),
                            })
                            .await;
                        return;
                    }
                }
            }
        });

        Ok((audio_tx, event_rx))
    }

    fn name(&self) -> &str {
        "google"
    }
}
