//! Issue tracker integration (Jira REST API v2)
//!
//! Each group key maps to at most one open issue, found by its summary. A
//! missing issue is created with every result in the description; an
//! existing one gets a comment for each result it does not mention yet.

use crate::error::IssueTrackerError;
use crate::models::{GroupKey, ResultGroup};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fmt::Write;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Parsed `user|pass|project|issueType|field:value,field:value` string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JiraParams {
    pub user: String,
    pub password: String,
    pub project: String,
    pub issue_type: String,
    /// Extra fields set on created issues, keyed by field id
    pub extra_fields: Vec<(String, String)>,
}

impl JiraParams {
    pub fn parse(raw: &str) -> Result<Self, IssueTrackerError> {
        let parts: Vec<&str> = raw.split('|').collect();
        if parts.len() < 4 {
            return Err(IssueTrackerError::InvalidParams(
                "expected user|pass|project|issueType|otherFieldKey:otherFieldValue,...".to_string(),
            ));
        }

        let extra_fields = parts
            .get(4)
            .map(|fields| {
                fields
                    .split(',')
                    .filter_map(|pair| {
                        let (key, value) = pair.split_once(':')?;
                        (!key.is_empty() && !value.contains(':'))
                            .then(|| (key.to_string(), value.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            user: parts[0].to_string(),
            password: parts[1].to_string(),
            project: parts[2].to_string(),
            issue_type: parts[3].to_string(),
            extra_fields,
        })
    }
}

/// What reporting a group did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerOutcome {
    Created { issue: String },
    Commented { issue: String, comments: usize },
    /// The open issue already mentions every result
    Unchanged { issue: String },
    /// More than one open issue matched the summary
    Ambiguous { matches: usize },
}

/// Trait for issue tracker backends
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Create or update the issue for one group
    async fn report(
        &self,
        key: &GroupKey,
        results: &[ResultGroup],
    ) -> Result<TrackerOutcome, IssueTrackerError>;

    /// Human-facing link to an issue
    fn browse_url(&self, issue: &str) -> String;
}

/// Issue summary derived from a group key
pub fn summary_for(key: &GroupKey) -> String {
    format!(
        "tag-watcher upgrade (image): {} (project): {} (cluster): {} (pod): {} (container): {}",
        key.image, key.project, key.cluster, key.pod_template, key.container
    )
}

/// Infrastructure header placed at the top of a new issue's description
pub fn infra_details(key: &GroupKey) -> String {
    format!(
        "project: {}\nimage: {}\ncluster: {}\npod: {}\ncontainer: {}\n\n",
        key.project, key.image, key.cluster, key.pod_template, key.container
    )
}

/// Comment text describing one result
pub fn comment_body(result: &ResultGroup) -> String {
    format!(
        "new version discovered:\n{{code}}Name: {}\nNamespace: {}\nQuantity: {}\n{}\nVersion: {}\n{{code}}",
        result.name,
        result.namespace,
        result.quantity,
        result.upgrades_line(),
        result.version
    )
}

/// Whether a description or comment already covers a result
pub fn result_mentioned(text: &str, result: &ResultGroup) -> bool {
    text.contains(&format!("Namespace: {}", result.namespace))
        && text.contains(&format!("Name: {}", result.name))
        && text.contains(&result.upgrades_line())
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<IssueRef>,
}

#[derive(Debug, Deserialize)]
struct IssueRef {
    key: String,
}

#[derive(Debug, Deserialize)]
struct IssueDetails {
    #[serde(default)]
    fields: IssueFields,
}

#[derive(Debug, Default, Deserialize)]
struct IssueFields {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    comment: Option<CommentPage>,
}

#[derive(Debug, Deserialize)]
struct CommentPage {
    #[serde(default)]
    comments: Vec<Comment>,
}

#[derive(Debug, Deserialize)]
struct Comment {
    #[serde(default)]
    body: String,
}

impl IssueDetails {
    fn texts(self) -> Vec<String> {
        let mut texts: Vec<String> = self.fields.description.into_iter().collect();
        if let Some(page) = self.fields.comment {
            texts.extend(page.comments.into_iter().map(|c| c.body));
        }
        texts
    }
}

/// Jira REST client authenticated with basic auth
pub struct JiraTracker {
    client: Client,
    base_url: Url,
    params: JiraParams,
}

impl JiraTracker {
    pub fn new(
        base_url: &str,
        params: JiraParams,
        timeout: Duration,
    ) -> Result<Self, IssueTrackerError> {
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{}/", base_url))?
        };

        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url,
            params,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, IssueTrackerError> {
        Ok(self.base_url.join(path)?)
    }

    async fn check(response: Response) -> Result<Response, IssueTrackerError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(IssueTrackerError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn search_open(&self, summary: &str) -> Result<Vec<String>, IssueTrackerError> {
        let jql = format!(
            "summary ~ \"{}\" AND project = {} AND statusCategory != Done",
            summary.replace('"', "\\\""),
            self.params.project
        );
        let response = self
            .client
            .get(self.endpoint("rest/api/2/search")?)
            .basic_auth(&self.params.user, Some(&self.params.password))
            .query(&[("jql", jql.as_str()), ("fields", "summary")])
            .send()
            .await?;
        let found: SearchResponse = Self::check(response).await?.json().await?;
        Ok(found.issues.into_iter().map(|i| i.key).collect())
    }

    async fn issue_texts(&self, issue: &str) -> Result<Vec<String>, IssueTrackerError> {
        let response = self
            .client
            .get(self.endpoint(&format!("rest/api/2/issue/{}", issue))?)
            .basic_auth(&self.params.user, Some(&self.params.password))
            .query(&[("fields", "description,comment")])
            .send()
            .await?;
        let details: IssueDetails = Self::check(response).await?.json().await?;
        Ok(details.texts())
    }

    async fn add_comment(&self, issue: &str, body: &str) -> Result<(), IssueTrackerError> {
        let response = self
            .client
            .post(self.endpoint(&format!("rest/api/2/issue/{}/comment", issue))?)
            .basic_auth(&self.params.user, Some(&self.params.password))
            .json(&json!({ "body": body }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn create_issue(
        &self,
        key: &GroupKey,
        results: &[ResultGroup],
    ) -> Result<String, IssueTrackerError> {
        let mut description = infra_details(key);
        for result in results {
            let _ = write!(description, "{}", comment_body(result));
        }

        let mut fields = Map::new();
        fields.insert("project".into(), json!({ "key": self.params.project }));
        fields.insert("summary".into(), json!(summary_for(key)));
        fields.insert("issuetype".into(), json!({ "name": self.params.issue_type }));
        fields.insert("description".into(), json!(description));
        for (field, value) in &self.params.extra_fields {
            fields.insert(field.clone(), Value::String(value.clone()));
        }

        let response = self
            .client
            .post(self.endpoint("rest/api/2/issue")?)
            .basic_auth(&self.params.user, Some(&self.params.password))
            .json(&json!({ "fields": fields }))
            .send()
            .await?;
        let created: IssueRef = Self::check(response).await?.json().await?;
        Ok(created.key)
    }
}

#[async_trait]
impl IssueTracker for JiraTracker {
    async fn report(
        &self,
        key: &GroupKey,
        results: &[ResultGroup],
    ) -> Result<TrackerOutcome, IssueTrackerError> {
        let summary = summary_for(key);
        let matches = self.search_open(&summary).await?;

        match matches.as_slice() {
            [] => {
                let issue = self.create_issue(key, results).await?;
                debug!(issue = %issue, group = %key, "Created issue");
                Ok(TrackerOutcome::Created { issue })
            }
            [issue] => {
                let mut texts = self.issue_texts(issue).await?;
                let mut comments = 0;
                for result in results {
                    if texts.iter().any(|text| result_mentioned(text, result)) {
                        continue;
                    }
                    let body = comment_body(result);
                    match self.add_comment(issue, &body).await {
                        Ok(()) => {
                            texts.push(body);
                            comments += 1;
                        }
                        Err(e) if comments > 0 => {
                            warn!(
                                issue = %issue,
                                group = %key,
                                posted = comments,
                                error = %e,
                                "Failed to add comment, stopping"
                            );
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }

                if comments == 0 {
                    Ok(TrackerOutcome::Unchanged {
                        issue: issue.clone(),
                    })
                } else {
                    Ok(TrackerOutcome::Commented {
                        issue: issue.clone(),
                        comments,
                    })
                }
            }
            many => {
                warn!(
                    group = %key,
                    matches = many.len(),
                    "Multiple open issues match group, skipping"
                );
                Ok(TrackerOutcome::Ambiguous {
                    matches: many.len(),
                })
            }
        }
    }

    fn browse_url(&self, issue: &str) -> String {
        format!("{}browse/{}", self.base_url, issue)
    }
}
