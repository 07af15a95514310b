use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;
use url::Url;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object, utils::slug::slugify};

use super::search::Search;

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum ArtifactStatus {
    #[serde(rename = "PENDING")]
    #[default]
    Pending,
    /// Rendering; progress is the counter fraction.
    #[serde(rename = "STARTED")]
    Started,
    #[serde(rename = "SENDING")]
    Sending,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILURE")]
    Failure,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactStatus::Pending => "PENDING",
            ArtifactStatus::Started => "STARTED",
            ArtifactStatus::Sending => "SENDING",
            ArtifactStatus::Success => "SUCCESS",
            ArtifactStatus::Failure => "FAILURE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ArtifactStatus::Success | ArtifactStatus::Failure)
    }
}

#[derive(Debug, Clone, Copy)]
enum ArtifactTransition {
    Start,
    Send,
    Succeed,
    Fail,
}

impl ArtifactTransition {
    fn as_str(&self) -> &'static str {
        match self {
            ArtifactTransition::Start => "start",
            ArtifactTransition::Send => "send",
            ArtifactTransition::Succeed => "succeed",
            ArtifactTransition::Fail => "fail",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: ArtifactLifecycleMachine,
        initial: Pending,
        states: [Pending, Started, Sending, Success, Failure],
        events {
            start {
                transition: { from: Pending, to: Started }
            }
            send {
                transition: { from: Started, to: Sending }
            }
            succeed {
                transition: { from: Sending, to: Success }
            }
            fail {
                transition: { from: Pending, to: Failure }
                transition: { from: Started, to: Failure }
                transition: { from: Sending, to: Failure }
            }
        }
    }

    pub(super) fn pending() -> ArtifactLifecycleMachine<(), Pending> {
        ArtifactLifecycleMachine::new(())
    }

    pub(super) fn started() -> Option<ArtifactLifecycleMachine<(), Started>> {
        pending().start().ok()
    }

    pub(super) fn sending() -> Option<ArtifactLifecycleMachine<(), Sending>> {
        started()?.send().ok()
    }
}

fn invalid_transition(state: &ArtifactStatus, event: ArtifactTransition) -> AppError {
    AppError::Validation(format!(
        "Invalid artifact transition: {} -> {}",
        state.as_str(),
        event.as_str()
    ))
}

fn compute_next_state(
    state: &ArtifactStatus,
    event: ArtifactTransition,
) -> Result<ArtifactStatus, AppError> {
    use lifecycle::*;
    let next = match (state, event) {
        (ArtifactStatus::Pending, ArtifactTransition::Start) => {
            pending().start().ok().map(|_| ArtifactStatus::Started)
        }
        (ArtifactStatus::Started, ArtifactTransition::Send) => {
            started().and_then(|m| m.send().ok()).map(|_| ArtifactStatus::Sending)
        }
        (ArtifactStatus::Sending, ArtifactTransition::Succeed) => {
            sending().and_then(|m| m.succeed().ok()).map(|_| ArtifactStatus::Success)
        }
        (ArtifactStatus::Pending, ArtifactTransition::Fail) => {
            pending().fail().ok().map(|_| ArtifactStatus::Failure)
        }
        (ArtifactStatus::Started, ArtifactTransition::Fail) => {
            started().and_then(|m| m.fail().ok()).map(|_| ArtifactStatus::Failure)
        }
        (ArtifactStatus::Sending, ArtifactTransition::Fail) => {
            sending().and_then(|m| m.fail().ok()).map(|_| ArtifactStatus::Failure)
        }
        _ => None,
    };
    next.ok_or_else(|| invalid_transition(state, event))
}

/// Where an artifact lives once rendered and published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub filename: String,
    pub path: String,
    pub url: String,
}

impl ArtifactLocation {
    /// Pure function of its inputs: the same query, instant and id always
    /// give the same location, and distinct ids never collide.
    pub fn derive(
        query: &str,
        created_at: DateTime<Utc>,
        artifact_id: &str,
        format: &str,
        batch_name: &str,
        public_base_url: &str,
    ) -> Result<Self, AppError> {
        let short_id: String = artifact_id.chars().take(8).collect();
        let filename = format!(
            "{}_{}Z_{}{}",
            slugify(query),
            created_at.format("%Y%m%d-%H%M%S"),
            short_id,
            format
        );
        let path = format!("{batch_name}/megadocs/{filename}");
        let url = format!("{}/{}", public_base_url.trim_end_matches('/'), path);
        Url::parse(&url)
            .map_err(|err| AppError::Validation(format!("Bad artifact url '{url}': {err}")))?;

        Ok(Self {
            filename,
            path,
            url,
        })
    }
}

stored_object!(Artifact, "artifact", {
    search_id: String,
    query: String,
    format: String,
    filename: String,
    path: String,
    url: String,
    status: ArtifactStatus,
    total_units: usize,
    filesize: u64,
    content_type: String
});

impl Artifact {
    /// Builds a pending artifact for `search` in `format`. Nothing is
    /// persisted and no progress counter is touched.
    pub fn new(
        search: &Search,
        format: &str,
        batch_name: &str,
        public_base_url: &str,
    ) -> Result<Self, AppError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let location =
            ArtifactLocation::derive(&search.query, now, &id, format, batch_name, public_base_url)?;
        let content_type = mime_guess::from_path(&location.filename)
            .first_or(mime_guess::mime::TEXT_PLAIN)
            .to_string();

        Ok(Self {
            id,
            created_at: now,
            updated_at: now,
            search_id: search.id.clone(),
            query: search.query.clone(),
            format: format.to_string(),
            filename: location.filename,
            path: location.path,
            url: location.url,
            status: ArtifactStatus::Pending,
            total_units: search.result_count(),
            filesize: 0,
            content_type,
        })
    }

    pub fn location(&self) -> ArtifactLocation {
        ArtifactLocation {
            filename: self.filename.clone(),
            path: self.path.clone(),
            url: self.url.clone(),
        }
    }

    pub async fn get_for_search(
        search_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut result = db
            .client
            .query(format!(
                "SELECT * FROM {} WHERE search_id = $search_id ORDER BY created_at ASC",
                Self::table_name()
            ))
            .bind(("search_id", search_id.to_string()))
            .await?;
        let artifacts: Vec<Self> = result.take(0)?;
        Ok(artifacts)
    }

    pub async fn mark_started(&self, db: &SurrealDbClient) -> Result<Self, AppError> {
        self.persist_transition(ArtifactTransition::Start, self.filesize, db)
            .await
    }

    /// Rendering finished; the artifact is on its way to the publish store.
    pub async fn mark_sending(&self, filesize: u64, db: &SurrealDbClient) -> Result<Self, AppError> {
        self.persist_transition(ArtifactTransition::Send, filesize, db)
            .await
    }

    pub async fn mark_succeeded(&self, db: &SurrealDbClient) -> Result<Self, AppError> {
        self.persist_transition(ArtifactTransition::Succeed, self.filesize, db)
            .await
    }

    pub async fn mark_failed(&self, db: &SurrealDbClient) -> Result<Self, AppError> {
        self.persist_transition(ArtifactTransition::Fail, self.filesize, db)
            .await
    }

    async fn persist_transition(
        &self,
        event: ArtifactTransition,
        filesize: u64,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let next = compute_next_state(&self.status, event)?;

        const TRANSITION_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $next,
                filesize = $filesize,
                updated_at = $now
            WHERE status = $current
            RETURN *;
        "#;

        let mut result = db
            .client
            .query(TRANSITION_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("next", next.as_str()))
            .bind(("current", self.status.as_str()))
            .bind(("filesize", filesize))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;

        let updated: Option<Self> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.status, event))
    }
}
