use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::constraints::{suffix_list, FileName, SizeTier};
use crate::error::{ClientError, Result, ValidationError};
use crate::models::{Refine, Study, Trial, User};
use crate::params::{
    MeasurementSource, NamedBytes, PostStudyClientParams, PostStudyServerParams, ResolvedInput,
    ResolvedStudyRequest,
};
use crate::parsers;
use crate::registry::{FileKind, FileRegistry};

const TOKEN_ENDPOINT: &str = "/token";
const USER_ENDPOINT: &str = "/user";
const ME_ENDPOINT: &str = "/user/me";
const STUDY_TASK_ENDPOINT: &str = "/task/study";
const TASK_STATUS_ENDPOINT: &str = "/task/status";
const UPLOAD_FIELD: &str = "files";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Server acknowledgement of an accepted study task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudySubmission {
    pub study_id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// What a registry synchronization step refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTarget {
    Profile,
    Files(FileKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub target: SyncTarget,
    pub message: String,
}

/// Outcome of refreshing the cached profile and file registries.
///
/// A failed step leaves its cache empty and does not undo the others.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Which caches [`BborClient::update_client_params`] refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSelection {
    pub me: bool,
    pub prm: bool,
    pub cif: bool,
    pub seq: bool,
}

impl SyncSelection {
    pub fn all() -> Self {
        Self {
            me: true,
            prm: true,
            cif: true,
            seq: true,
        }
    }

    pub fn files(kind: FileKind) -> Self {
        Self {
            me: false,
            prm: kind == FileKind::InstrumentParameter,
            cif: kind == FileKind::Phase,
            seq: kind == FileKind::Sequence,
        }
    }

    fn kinds(self) -> Vec<FileKind> {
        FileKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                FileKind::InstrumentParameter => self.prm,
                FileKind::Phase => self.cif,
                FileKind::Sequence => self.seq,
            })
            .collect()
    }
}

impl Default for SyncSelection {
    fn default() -> Self {
        Self::all()
    }
}

/// Session against a BBO-Rietveld server.
///
/// Holds the bearer token, the file registries and the cached profile.
/// Every authenticated call checks for a token before any network I/O.
#[derive(Debug)]
pub struct BborClient {
    config: ClientConfig,
    http: Client,
    token: Option<String>,
    registry: FileRegistry,
    me: Option<User>,
    history: Vec<String>,
}

impl BborClient {
    /// Builds an unauthenticated session.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .danger_accept_invalid_certs(!config.verify_cert)
            .build()?;
        Ok(Self {
            config,
            http,
            token: None,
            registry: FileRegistry::new(),
            me: None,
            history: Vec::new(),
        })
    }

    /// Builds a session and authenticates when credentials are configured.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let credentials = match (&config.username, &config.password) {
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
            (None, None) => None,
            _ => {
                warn!("both username and password are required; staying unauthenticated");
                None
            }
        };
        let mut client = Self::new(config)?;
        if let Some((username, password)) = credentials {
            client.authenticate(&username, &password)?;
        }
        Ok(client)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        self.config.server.base_url()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    pub fn me(&self) -> Option<&User> {
        self.me.as_ref()
    }

    /// Ids of studies accepted in this session, oldest first.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Requests a token, then refreshes the profile and every registry.
    ///
    /// The session is unauthenticated while the token request is in flight
    /// and stays so if it fails for any reason. Refresh failures after a
    /// granted token are reported, not raised.
    pub fn authenticate(&mut self, username: &str, password: &str) -> Result<SyncReport> {
        self.reset();
        let token = self.request_token(username, password)?;
        self.token = Some(token.access_token);
        info!(server = %self.config.server, user = username, "token received");
        self.update_client_params(SyncSelection::all())
    }

    fn request_token(&self, username: &str, password: &str) -> Result<TokenResponse> {
        let response = self
            .http
            .post(self.url(TOKEN_ENDPOINT))
            .form(&[("username", username), ("password", password)])
            .send()?;
        let status = response.status();
        let body = response.text()?;
        if status != StatusCode::OK {
            warn!(status = status.as_u16(), "token request rejected");
            return Err(ClientError::AuthenticationRejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Drops the token and every cached server state.
    pub fn logout(&mut self) {
        self.reset();
        info!("logged out");
    }

    fn reset(&mut self) {
        self.token = None;
        self.me = None;
        self.registry.clear();
    }

    /// Registers a new account, then authenticates as it.
    pub fn create_user(
        &mut self,
        username: &str,
        password: &str,
        group_id: &str,
    ) -> Result<SyncReport> {
        let response = self
            .http
            .post(self.url(USER_ENDPOINT))
            .query(&[
                ("name", username),
                ("pwd", password),
                ("pwd2", password),
                ("group", group_id),
            ])
            .send()?;
        expect_status(USER_ENDPOINT, response, StatusCode::OK)?;
        info!(user = username, "user created");
        self.authenticate(username, password)
    }

    /// Refreshes the selected caches in order: profile, prm, cif, seq.
    pub fn update_client_params(&mut self, selection: SyncSelection) -> Result<SyncReport> {
        self.require_token()?;
        let mut report = SyncReport::default();
        if selection.me {
            if let Err(err) = self.get_me() {
                warn!(error = %err, "profile refresh failed");
                report.failures.push(SyncFailure {
                    target: SyncTarget::Profile,
                    message: err.to_string(),
                });
            }
        }
        for kind in selection.kinds() {
            if let Err(err) = self.list_files(kind) {
                warn!(kind = kind.as_str(), error = %err, "file list refresh failed");
                self.registry.replace(kind, Vec::new());
                report.failures.push(SyncFailure {
                    target: SyncTarget::Files(kind),
                    message: err.to_string(),
                });
            }
        }
        Ok(report)
    }

    pub fn get_me(&mut self) -> Result<User> {
        let result = self
            .authorized(Method::GET, ME_ENDPOINT)
            .and_then(|request| read_json::<User>(ME_ENDPOINT, request.send()?, StatusCode::OK));
        match result {
            Ok(user) => {
                self.me = Some(user.clone());
                Ok(user)
            }
            Err(err) => {
                self.me = None;
                Err(err)
            }
        }
    }

    /// Fetches the server's file list for `kind` and replaces that registry.
    pub fn list_files(&mut self, kind: FileKind) -> Result<Vec<String>> {
        let endpoint = kind.endpoint();
        let request = self.authorized(Method::GET, &endpoint)?;
        let names: Vec<String> = read_json(&endpoint, request.send()?, StatusCode::OK)?;
        debug!(kind = kind.as_str(), count = names.len(), "file list updated");
        self.registry.replace(kind, names.clone());
        Ok(names)
    }

    /// Uploads one file and refreshes only that kind's registry.
    ///
    /// The name pattern, suffix, size and collision checks run locally first.
    pub fn upload_file(&mut self, kind: FileKind, path: &Path, overwrite: bool) -> Result<Value> {
        self.require_token()?;
        let field = upload_field(kind);
        let meta = fs::metadata(path).map_err(|_| ValidationError::FileNotFound {
            field,
            path: path.to_path_buf(),
        })?;
        if !meta.is_file() {
            return Err(ValidationError::FileNotFound {
                field,
                path: path.to_path_buf(),
            }
            .into());
        }
        let raw_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = FileName::new(field, &raw_name)?;
        if let Some(suffixes) = kind.suffixes() {
            if !name.has_suffix(suffixes) {
                return Err(ValidationError::Suffix {
                    field,
                    name: name.into_inner(),
                    expected: suffix_list(suffixes),
                }
                .into());
            }
        }
        SizeTier::Small.check(field, &name, meta.len())?;
        if !overwrite && self.registry.contains(kind, &name) {
            return Err(ClientError::NameCollision {
                kind,
                name: name.into_inner(),
            });
        }

        let content = fs::read(path)?;
        let endpoint = kind.endpoint();
        let form = Form::new().part(
            UPLOAD_FIELD,
            Part::bytes(content).file_name(name.as_str().to_string()),
        );
        let response = self
            .authorized(Method::POST, &endpoint)?
            .query(&[("overwrite", overwrite)])
            .multipart(form)
            .send()?;
        let ack: Value = read_json(&endpoint, response, StatusCode::OK)?;
        info!(kind = kind.as_str(), name = %name, overwrite, "file uploaded");
        self.list_files(kind)?;
        Ok(ack)
    }

    /// Deletes server files of one kind, then refreshes that registry.
    ///
    /// Names missing from the registry are skipped when `ignore_absent` is
    /// set and rejected otherwise. Returns `None` when nothing was sent.
    pub fn delete_files(
        &mut self,
        kind: FileKind,
        names: &[String],
        ignore_absent: bool,
    ) -> Result<Option<Value>> {
        self.require_token()?;
        let mut present = Vec::new();
        for name in names {
            if self.registry.contains(kind, name) {
                present.push(name.as_str());
            } else if ignore_absent {
                warn!(kind = kind.as_str(), name = %name, "not found on the server; skipped");
            } else {
                return Err(ValidationError::NotUploaded {
                    field: "filenames",
                    name: name.clone(),
                }
                .into());
            }
        }
        if present.is_empty() {
            return Ok(None);
        }

        let endpoint = kind.endpoint();
        let query: Vec<(&str, &str)> = present.iter().map(|name| ("filenames", *name)).collect();
        let response = self
            .authorized(Method::DELETE, &endpoint)?
            .query(&query)
            .send()?;
        let ack = read_json(&endpoint, response, StatusCode::OK);
        // Refresh even after a rejected delete so the registry matches the server.
        if let Err(err) = self.list_files(kind) {
            warn!(kind = kind.as_str(), error = %err, "file list refresh failed");
        }
        let ack: Value = ack?;
        info!(kind = kind.as_str(), count = present.len(), "files deleted");
        Ok(Some(ack))
    }

    /// Validates a server-side request against the registries and posts it.
    pub fn post_study_task(&mut self, params: PostStudyServerParams) -> Result<StudySubmission> {
        self.require_token()?;
        let payload = params.validate(&self.registry)?;
        let mut form = Form::new();
        for (key, value) in payload.form_fields() {
            form = form.text(key, value);
        }
        for attachment in payload.attachments {
            let NamedBytes { name, content } = attachment.file;
            form = form.part(attachment.field, Part::bytes(content).file_name(name));
        }
        let response = self
            .authorized(Method::POST, STUDY_TASK_ENDPOINT)?
            .multipart(form)
            .send()?;
        let submission: StudySubmission =
            read_json(STUDY_TASK_ENDPOINT, response, StatusCode::ACCEPTED)?;
        info!(
            study_id = %submission.study_id,
            study_name = %payload.fields.study_name,
            "study task accepted"
        );
        self.history.push(submission.study_id.clone());
        Ok(submission)
    }

    /// Resolves, uploads, parses, re-validates and submits a study request.
    ///
    /// Nothing is submitted when resolution, an upload, parsing or server-side
    /// validation fails. Repeated calls are not deduplicated.
    pub fn submit_study(&mut self, params: &PostStudyClientParams) -> Result<StudySubmission> {
        self.require_token()?;
        let request = params.resolve_default(&self.registry)?;
        self.submit_resolved(&request)
    }

    /// Submits an already resolved request, uploading its local files first.
    pub fn submit_resolved(&mut self, request: &ResolvedStudyRequest) -> Result<StudySubmission> {
        self.require_token()?;
        for (kind, path, overwrite) in request.pending_uploads() {
            self.upload_file(kind, path, overwrite)?;
        }
        let (gpx, measurement) = load_payloads(&request.input)?;
        self.post_study_task(request.to_server_params(gpx, measurement))
    }

    /// Queue status for one study, or for the account when `study_id` is `None`.
    pub fn ask_task_queue_status(&self, study_id: Option<&str>) -> Result<Value> {
        let mut request = self.authorized(Method::GET, TASK_STATUS_ENDPOINT)?;
        if let Some(id) = study_id {
            request = request.query(&[("study_id", id)]);
        }
        read_json(TASK_STATUS_ENDPOINT, request.send()?, StatusCode::OK)
    }

    pub fn get_study(&self, study_id: &str) -> Result<Study> {
        self.get_document("/study", "study_id", study_id)
    }

    pub fn search_studies(&self, query: &Value) -> Result<Vec<Study>> {
        self.search_documents("/study/search", query)
    }

    pub fn get_trial(&self, trial_id: &str) -> Result<Trial> {
        self.get_document("/trial", "trial_id", trial_id)
    }

    pub fn search_trials(&self, query: &Value) -> Result<Vec<Trial>> {
        self.search_documents("/trial/search", query)
    }

    pub fn get_refine(&self, refine_id: &str) -> Result<Refine> {
        self.get_document("/refine", "refine_id", refine_id)
    }

    pub fn search_refines(&self, query: &Value) -> Result<Vec<Refine>> {
        self.search_documents("/refine/search", query)
    }

    fn get_document<T: DeserializeOwned>(&self, endpoint: &str, key: &str, id: &str) -> Result<T> {
        let request = self.authorized(Method::GET, endpoint)?.query(&[(key, id)]);
        read_json(endpoint, request.send()?, StatusCode::OK)
    }

    fn search_documents<T: DeserializeOwned>(&self, endpoint: &str, query: &Value) -> Result<T> {
        let request = self.authorized(Method::POST, endpoint)?.json(query);
        read_json(endpoint, request.send()?, StatusCode::OK)
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url(), endpoint)
    }

    fn require_token(&self) -> Result<&str> {
        self.token.as_deref().ok_or(ClientError::NotAuthenticated)
    }

    fn authorized(&self, method: Method, endpoint: &str) -> Result<RequestBuilder> {
        let token = self.require_token()?;
        Ok(self
            .http
            .request(method, self.url(endpoint))
            .bearer_auth(token))
    }
}

fn upload_field(kind: FileKind) -> &'static str {
    match kind {
        FileKind::InstrumentParameter => "prmfile",
        FileKind::Phase => "ciffiles",
        FileKind::Sequence => "seqfile",
    }
}

/// Reads the project bundle, or parses the measurement into its CSV upload.
fn load_payloads(input: &ResolvedInput) -> Result<(Option<NamedBytes>, Option<NamedBytes>)> {
    match input {
        ResolvedInput::ProjectBundle { path, name } => {
            let content = fs::read(path)?;
            Ok((Some(NamedBytes::new(name.as_str(), content)), None))
        }
        ResolvedInput::Measurement { measurement, .. } => {
            let parsed = match measurement {
                MeasurementSource::Path { path, .. } => parsers::parse_file(path)?,
                MeasurementSource::InMemory(bytes) => {
                    parsers::parse_bytes(&bytes.name, &bytes.content)?
                }
            };
            debug!(
                source = %parsed.source_name,
                points = parsed.histogram.len(),
                "measurement parsed"
            );
            Ok((None, Some(parsed.to_upload())))
        }
    }
}

fn expect_status(endpoint: &str, response: Response, expected: StatusCode) -> Result<String> {
    let status = response.status();
    let body = response.text()?;
    if status != expected {
        return Err(ClientError::Transport {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

fn read_json<T: DeserializeOwned>(
    endpoint: &str,
    response: Response,
    expected: StatusCode,
) -> Result<T> {
    let body = expect_status(endpoint, response, expected)?;
    Ok(serde_json::from_str(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Server;

    fn offline_client() -> BborClient {
        BborClient::new(ClientConfig::for_server(Server::Custom(
            "http://127.0.0.1:9".to_string(),
        )))
        .expect("client")
    }

    #[test]
    fn authenticated_calls_fail_locally_without_token() {
        let mut client = offline_client();
        assert!(matches!(
            client.list_files(FileKind::Phase),
            Err(ClientError::NotAuthenticated)
        ));
        assert!(matches!(
            client.ask_task_queue_status(None),
            Err(ClientError::NotAuthenticated)
        ));
        assert!(matches!(
            client.submit_study(&PostStudyClientParams::default()),
            Err(ClientError::NotAuthenticated)
        ));
        assert!(matches!(
            client.update_client_params(SyncSelection::all()),
            Err(ClientError::NotAuthenticated)
        ));
        assert!(client.history().is_empty());
    }

    #[test]
    fn selection_for_one_kind_skips_profile() {
        let selection = SyncSelection::files(FileKind::Sequence);
        assert!(!selection.me);
        assert_eq!(selection.kinds(), vec![FileKind::Sequence]);
        assert_eq!(SyncSelection::all().kinds().len(), 3);
    }

    #[test]
    fn upload_field_names_follow_kind() {
        assert_eq!(upload_field(FileKind::InstrumentParameter), "prmfile");
        assert_eq!(upload_field(FileKind::Phase), "ciffiles");
    }

    #[test]
    fn submission_keeps_extra_fields() {
        let submission: StudySubmission =
            serde_json::from_str(r#"{"study_id": "s1", "queue_position": 3}"#).expect("json");
        assert_eq!(submission.study_id, "s1");
        assert_eq!(submission.extra["queue_position"], 3);
    }
}
