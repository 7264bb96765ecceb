// Funded Posts API
//
// Anonymous posts created through the public API. Posting costs the job
// reward plus a fixed API fee, paid up front through an L402 challenge.
// Each paid invoice funds exactly one post.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::l402::{parse_authorization, www_authenticate_value, L402Service};
use crate::store::{FundedPost, LedgerStore};

pub const API_ACCESS_FEE: i64 = 10;
pub const MIN_JOB_REWARD: i64 = 0;
pub const DEFAULT_JOB_REWARD: i64 = 1000;
/// 21M BTC in sats, keeps `reward + fee` and its msat form in range
pub const MAX_JOB_REWARD: i64 = 2_100_000_000_000_000;
pub const CREATE_POST_ACTION: &str = "create_post";

/// Body of the 402 answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequiredBody {
    pub error: String,
    pub total_amount: i64,
    pub job_reward: i64,
    pub api_fee: i64,
    pub currency: String,
    pub message: String,
    pub payment_request: String,
}

#[derive(Debug, Clone)]
pub struct PostChallenge {
    pub body: PaymentRequiredBody,
    pub www_authenticate: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedPost {
    pub success: bool,
    pub post_id: Uuid,
    pub message: String,
    pub job_reward: i64,
    pub api_fee: i64,
    pub total_paid: i64,
    pub payment_hash: String,
}

#[derive(Debug, Clone)]
pub enum PostOutcome {
    PaymentRequired(PostChallenge),
    Created(CreatedPost),
}

/// Fields accepted when creating a post. Loosely typed so that type errors
/// can be reported field by field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<Value>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub reward: Option<Value>,
}

/// Reward requested in the body, validated
fn requested_reward(reward: Option<&Value>) -> LedgerResult<i64> {
    match reward {
        None | Some(Value::Null) => Ok(DEFAULT_JOB_REWARD),
        Some(value) => match value.as_i64() {
            Some(n) if n > MAX_JOB_REWARD => Err(LedgerError::invalid(format!(
                "Reward must not exceed {} sats",
                MAX_JOB_REWARD
            ))),
            Some(n) if n >= 0 => Ok(n.max(MIN_JOB_REWARD)),
            _ => Err(LedgerError::invalid("Reward must be a non-negative number")),
        },
    }
}

fn total_price(job_reward: i64) -> LedgerResult<i64> {
    job_reward
        .checked_add(API_ACCESS_FEE)
        .filter(|_| (MIN_JOB_REWARD..=MAX_JOB_REWARD).contains(&job_reward))
        .ok_or_else(|| LedgerError::invalid("Reward is out of range"))
}

pub fn pricing() -> Value {
    serde_json::json!({
        "message": "Posts API endpoint",
        "endpoints": {
            "POST /api/posts": "Create a new post (requires L402 payment)",
            "GET /api/posts": "Describe pricing (free)"
        },
        "l402_info": {
            "api_fee": format!("{} sats (fixed)", API_ACCESS_FEE),
            "job_reward": format!(
                "Variable (minimum: {} sats, default: {} sats)",
                MIN_JOB_REWARD, DEFAULT_JOB_REWARD
            ),
            "total_cost": format!("Job reward + {} sats API fee", API_ACCESS_FEE),
            "currency": "satoshis",
            "documentation": "https://docs.lightning.engineering/the-lightning-network/l402"
        }
    })
}

#[derive(Clone)]
pub struct PostsService {
    l402: L402Service,
    store: Arc<dyn LedgerStore>,
}

impl PostsService {
    pub fn new(l402: L402Service, store: Arc<dyn LedgerStore>) -> Self {
        Self { l402, store }
    }

    /// Handle `POST /api/posts`: issue a challenge when no credentials are
    /// presented, otherwise verify the payment and create the post.
    pub async fn handle(
        &self,
        authorization: Option<&str>,
        request: PostRequest,
    ) -> LedgerResult<PostOutcome> {
        match authorization {
            None => {
                let reward = requested_reward(request.reward.as_ref())?;
                Ok(PostOutcome::PaymentRequired(self.challenge(reward).await?))
            }
            Some(header) => Ok(PostOutcome::Created(self.create_post(header, request).await?)),
        }
    }

    pub async fn challenge(&self, job_reward: i64) -> LedgerResult<PostChallenge> {
        let total = total_price(job_reward)?;
        let memo = format!(
            "Pay {} sats to post job on Ganamos ({} reward + {} API fee)",
            total, job_reward, API_ACCESS_FEE
        );
        let challenge = self
            .l402
            .create_challenge(total as u64, &memo, CREATE_POST_ACTION)
            .await?;

        Ok(PostChallenge {
            www_authenticate: www_authenticate_value(&challenge),
            body: PaymentRequiredBody {
                error: "Payment required to post job".to_string(),
                total_amount: total,
                job_reward,
                api_fee: API_ACCESS_FEE,
                currency: "sats".to_string(),
                message: format!(
                    "Pay {} sats to post your job ({} reward + {} API fee)",
                    total, job_reward, API_ACCESS_FEE
                ),
                payment_request: challenge.invoice,
            },
        })
    }

    async fn create_post(&self, authorization: &str, request: PostRequest) -> LedgerResult<CreatedPost> {
        let token = parse_authorization(authorization).ok_or_else(|| {
            LedgerError::Unauthorized(
                "Invalid Authorization header format. Expected: L402 <macaroon>:<preimage>"
                    .to_string(),
            )
        })?;

        let verified = self
            .l402
            .verify_token(&token, Some(CREATE_POST_ACTION))
            .await?;

        let description = match request.description.as_ref() {
            Some(Value::String(d)) if !d.trim().is_empty() => d.clone(),
            _ => {
                return Err(LedgerError::invalid(
                    "Description is required and must be a string",
                ))
            }
        };
        let job_reward = requested_reward(request.reward.as_ref())?;
        let expected_total = total_price(job_reward)?;

        if let Some(paid) = verified.macaroon.caveat("amount") {
            if paid.parse::<i64>().ok() != Some(expected_total) {
                return Err(LedgerError::Unauthorized(format!(
                    "Payment amount mismatch. Expected {} sats ({} reward + {} API fee), but token was for {} sats",
                    expected_total, job_reward, API_ACCESS_FEE, paid
                )));
            }
        }

        if self
            .store
            .find_post_by_funding_hash(&verified.payment_hash)
            .await?
            .is_some()
        {
            warn!(payment_hash = %verified.payment_hash, "L402 payment replayed");
            return Err(LedgerError::Conflict(
                "Payment has already been used to create a post".to_string(),
            ));
        }

        let post = FundedPost {
            id: Uuid::new_v4(),
            title: request.title,
            description,
            reward: job_reward,
            image_url: request.image_url,
            city: request.location.clone(),
            location: request.location,
            latitude: request.latitude,
            longitude: request.longitude,
            funding_r_hash: verified.payment_hash.clone(),
            funding_status: "paid".to_string(),
            is_anonymous: true,
            created_at: Utc::now(),
        };
        self.store.insert_funded_post(&post).await?;

        info!(post_id = %post.id, job_reward, payment_hash = %verified.payment_hash, "Funded post created");

        Ok(CreatedPost {
            success: true,
            post_id: post.id,
            message: "Job posted successfully".to_string(),
            job_reward,
            api_fee: API_ACCESS_FEE,
            total_paid: expected_total,
            payment_hash: verified.payment_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::l402::Macaroon;
    use crate::lightning::FakeLightningNode;
    use crate::store::MemoryStore;

    fn setup() -> (Arc<FakeLightningNode>, Arc<MemoryStore>, PostsService) {
        let node = Arc::new(FakeLightningNode::new());
        let store = Arc::new(MemoryStore::new());
        let l402 = L402Service::new(node.clone(), b"posts-key".to_vec(), "ganamos-posts", 3600);
        (node.clone(), store.clone(), PostsService::new(l402, store))
    }

    fn request(description: &str, reward: Option<i64>) -> PostRequest {
        PostRequest {
            description: Some(Value::String(description.to_string())),
            reward: reward.map(Value::from),
            location: Some("Oakland".to_string()),
            ..Default::default()
        }
    }

    /// Issue a challenge, pay it, and build the Authorization header
    async fn paid_header(
        node: &FakeLightningNode,
        service: &PostsService,
        reward: i64,
    ) -> (String, PostChallenge) {
        let challenge = service.challenge(reward).await.unwrap();
        let header = challenge
            .www_authenticate
            .split('"')
            .nth(1)
            .unwrap()
            .to_string();
        let macaroon = Macaroon::decode(&header).unwrap();
        let preimage = node.settle(&macaroon.identifier).await.unwrap();
        (format!("L402 {}:{}", header, preimage), challenge)
    }

    #[test]
    fn test_requested_reward() {
        assert_eq!(requested_reward(None).unwrap(), DEFAULT_JOB_REWARD);
        assert_eq!(requested_reward(Some(&Value::from(0))).unwrap(), 0);
        assert_eq!(requested_reward(Some(&Value::from(2500))).unwrap(), 2500);
        assert!(requested_reward(Some(&Value::from(-1))).is_err());
        assert!(requested_reward(Some(&Value::from("100"))).is_err());
        assert!(requested_reward(Some(&Value::from(1.5))).is_err());
        assert_eq!(
            requested_reward(Some(&Value::from(MAX_JOB_REWARD))).unwrap(),
            MAX_JOB_REWARD
        );
        assert!(requested_reward(Some(&Value::from(MAX_JOB_REWARD + 1))).is_err());
    }

    #[tokio::test]
    async fn test_huge_reward_is_rejected_without_invoice() {
        let (_, _, service) = setup();
        let result = service
            .handle(None, request("x", Some(i64::MAX)))
            .await;
        assert!(matches!(result, Err(LedgerError::InvalidRequest(_))));
        assert!(matches!(
            service.challenge(i64::MAX).await,
            Err(LedgerError::InvalidRequest(_))
        ));
        assert!(matches!(
            service.challenge(-5).await,
            Err(LedgerError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_no_credentials_yields_challenge() {
        let (_, _, service) = setup();
        let outcome = service.handle(None, request("x", Some(500))).await.unwrap();
        let PostOutcome::PaymentRequired(challenge) = outcome else {
            panic!("expected a challenge");
        };
        assert_eq!(challenge.body.total_amount, 510);
        assert_eq!(challenge.body.job_reward, 500);
        assert_eq!(challenge.body.api_fee, 10);
        assert!(challenge.www_authenticate.starts_with("L402 macaroon=\""));
        assert!(challenge
            .www_authenticate
            .contains(&challenge.body.payment_request));
    }

    #[tokio::test]
    async fn test_paid_post_created_once() {
        let (node, store, service) = setup();
        let (header, _) = paid_header(&node, &service, 1000).await;

        let outcome = service
            .handle(Some(&header), request("Broken streetlight", None))
            .await
            .unwrap();
        let PostOutcome::Created(created) = outcome else {
            panic!("expected a created post");
        };
        assert_eq!(created.total_paid, 1010);
        assert!(store
            .find_post_by_funding_hash(&created.payment_hash)
            .await
            .unwrap()
            .is_some());

        let replay = service
            .handle(Some(&header), request("Another one", None))
            .await;
        assert!(matches!(replay, Err(LedgerError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_reward_must_match_paid_amount() {
        let (node, _, service) = setup();
        let (header, _) = paid_header(&node, &service, 100).await;

        let result = service
            .handle(Some(&header), request("Graffiti", Some(5000)))
            .await;
        assert!(matches!(result, Err(LedgerError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_validation_and_header_errors() {
        let (node, _, service) = setup();
        assert!(matches!(
            service.handle(Some("Bearer abc"), request("x", None)).await,
            Err(LedgerError::Unauthorized(_))
        ));

        let (header, _) = paid_header(&node, &service, 1000).await;
        let mut missing = request("", None);
        missing.description = Some(Value::from(42));
        assert!(matches!(
            service.handle(Some(&header), missing).await,
            Err(LedgerError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_unpaid_token_rejected() {
        let (_, _, service) = setup();
        let challenge = service.challenge(1000).await.unwrap();
        let macaroon = challenge.www_authenticate.split('"').nth(1).unwrap();
        let header = format!("L402 {}:{}", macaroon, "11".repeat(32));

        assert!(matches!(
            service.handle(Some(&header), request("x", None)).await,
            Err(LedgerError::L402(_))
        ));
    }
}
