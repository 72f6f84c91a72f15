//! Continuation-token and offset pagination.
//!
//! Most Azure DevOps list endpoints return a page of records plus a
//! continuation token, either in the `x-ms-continuationtoken` header or
//! somewhere in the body. Older ones page with `$top`/`$skip` instead.
//! [`PaginationWalker`] turns either into a lazy stream: the next page is
//! fetched only when the consumer asks for more items.

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::RequestExecutor;
use crate::api::{ApiResponse, OperationDescriptor};
use crate::error::{ApiError, PermanentKind};

const CONTINUATION_HEADER: &str = "x-ms-continuationtoken";

/// Body fields checked for a continuation, in order.
const TOKEN_FIELDS: [&str; 2] = ["continuationToken", "x-ms-continuationtoken"];
const LINK_FIELDS: [&str; 2] = ["nextLink", "@odata.nextLink"];

/// Query parameters of a next-link that carry the cursor, in order.
const LINK_TOKEN_PARAMS: [&str; 4] = ["continuationToken", "$skip", "skipToken", "token"];

/// Envelope fields that hold the records of a page.
const ITEM_FIELDS: [&str; 3] = ["value", "results", "items"];

/// `$top` for offset walks that do not set a page size.
pub const DEFAULT_OFFSET_PAGE_SIZE: u32 = 100;

/// Where the continuation token goes on the next request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuationStyle {
    /// As a query parameter with this name.
    Query(String),
    /// As a top-level field of the JSON request body.
    BodyField(String),
    /// `$top`/`$skip` paging. The cursor is the next `$skip`, advanced by the
    /// number of records received; a short or empty page ends the walk.
    Offset,
}

impl Default for ContinuationStyle {
    fn default() -> Self {
        Self::Query("continuationToken".to_string())
    }
}

/// A paginated call: the operation for the first page plus how to advance.
#[derive(Debug, Clone)]
pub struct PageRequest {
    template: OperationDescriptor,
    style: ContinuationStyle,
    page_size: Option<u32>,
    max_pages: Option<usize>,
    start_token: Option<String>,
}

impl PageRequest {
    pub fn new(template: OperationDescriptor) -> Self {
        Self {
            template,
            style: ContinuationStyle::default(),
            page_size: None,
            max_pages: None,
            start_token: None,
        }
    }

    #[must_use]
    pub fn with_style(mut self, style: ContinuationStyle) -> Self {
        self.style = style;
        self
    }

    /// Requests pages of `page_size` records via `$top`.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Stops with [`ApiError::PaginationLimitExceeded`] instead of fetching
    /// more than `max_pages` pages.
    ///
    /// The limit is checked before every fetch, including the first, so
    /// `max_pages == 0` fails without sending anything.
    #[must_use]
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Resumes a walk from a token returned by an earlier one.
    #[must_use]
    pub fn with_start_token(mut self, token: impl Into<String>) -> Self {
        self.start_token = Some(token.into());
        self
    }

    pub fn template(&self) -> &OperationDescriptor {
        &self.template
    }

    pub fn style(&self) -> &ContinuationStyle {
        &self.style
    }

    /// `$top` sent with each page, if any.
    pub fn page_size(&self) -> Option<u32> {
        match self.style {
            ContinuationStyle::Offset => Some(self.page_size.unwrap_or(DEFAULT_OFFSET_PAGE_SIZE)),
            _ => self.page_size,
        }
    }

    /// Builds the operation for the page addressed by `token`.
    ///
    /// # Errors
    ///
    /// A body-field continuation on an operation whose body is not a JSON
    /// object, or an offset cursor that is not a number, is rejected as
    /// [`PermanentKind::InvalidRequest`].
    pub fn operation_for(&self, token: Option<&str>) -> Result<OperationDescriptor, ApiError> {
        let mut operation = self.template.clone();
        if let Some(size) = self.page_size() {
            operation.set_query("$top", size.to_string());
        }

        let Some(token) = token else {
            return Ok(operation);
        };

        match &self.style {
            ContinuationStyle::Query(name) => operation.set_query(name.as_str(), token),
            ContinuationStyle::BodyField(name) => {
                let label = operation.to_string();
                let body = operation
                    .body
                    .get_or_insert_with(|| Value::Object(Default::default()));
                let Some(fields) = body.as_object_mut() else {
                    return Err(invalid_request(
                        label,
                        format!("cannot place continuation field '{name}' in a non-object body"),
                    ));
                };
                fields.insert(name.clone(), Value::String(token.to_string()));
            }
            ContinuationStyle::Offset => {
                let skip = parse_skip(token, &operation)?;
                operation.set_query("$skip", skip.to_string());
            }
        }
        Ok(operation)
    }

    /// The cursor following a page of `received` records fetched at `token`.
    fn next_offset(&self, token: Option<&str>, received: usize) -> Option<String> {
        let size = usize::try_from(self.page_size()?).ok()?;
        if received == 0 || received < size {
            return None;
        }
        let skip = token.and_then(|t| t.trim().parse::<usize>().ok()).unwrap_or(0);
        Some(skip.saturating_add(received).to_string())
    }
}

fn invalid_request(operation: String, message: String) -> ApiError {
    ApiError::Permanent {
        kind: PermanentKind::InvalidRequest,
        status: None,
        message,
        operation,
    }
}

fn parse_skip(token: &str, operation: &OperationDescriptor) -> Result<usize, ApiError> {
    token.trim().parse().map_err(|_| {
        invalid_request(
            operation.to_string(),
            format!("offset cursor '{token}' is not a record count"),
        )
    })
}

/// One fetched page.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorPage {
    pub items: Vec<Value>,
    /// Token for the next page; `None` on the last page. For offset walks
    /// this is the next `$skip`.
    pub continuation_token: Option<String>,
    /// One-based.
    pub page_number: usize,
    /// The operation that produced this page.
    pub request: OperationDescriptor,
}

enum Cursor {
    First(Option<String>),
    Next(String),
    Done,
}

struct WalkState {
    executor: RequestExecutor,
    request: PageRequest,
    cursor: Cursor,
    pages: usize,
    retrieved: usize,
}

impl WalkState {
    async fn fetch(mut self) -> Result<Option<(CursorPage, Self)>, ApiError> {
        let token = match std::mem::replace(&mut self.cursor, Cursor::Done) {
            Cursor::Done => return Ok(None),
            Cursor::First(token) => token,
            Cursor::Next(token) => Some(token),
        };

        if let Some(max) = self.request.max_pages {
            if self.pages >= max {
                debug!(max, retrieved = self.retrieved, "page limit reached with more pages pending");
                return Err(ApiError::PaginationLimitExceeded {
                    max,
                    retrieved: self.retrieved,
                });
            }
        }

        let operation = self.request.operation_for(token.as_deref())?;
        let response = self.executor.execute(&operation).await?;

        let items = extract_items(&response.payload);
        let continuation_token = match self.request.style {
            ContinuationStyle::Offset => self.request.next_offset(token.as_deref(), items.len()),
            _ => extract_continuation_token(&response),
        };
        self.pages += 1;
        self.retrieved += items.len();
        debug!(
            operation = %operation,
            page = self.pages,
            items = items.len(),
            has_more = continuation_token.is_some(),
            "fetched page"
        );

        if let Some(next) = &continuation_token {
            self.cursor = Cursor::Next(next.clone());
        }
        let page = CursorPage {
            items,
            continuation_token,
            page_number: self.pages,
            request: operation,
        };
        Ok(Some((page, self)))
    }
}

/// Walks paginated listings through a [`RequestExecutor`].
///
/// Every page fetch is a normal executor call, so it is rate limited and
/// retried like any other request. Once a fetch fails for good the stream
/// yields that error and ends; items already yielded stay valid.
///
/// # Example
///
/// ```rust,no_run
/// use devops_pacer::api::OperationDescriptor;
/// use devops_pacer::core::{PageRequest, PaginationWalker, RequestExecutor};
/// use futures::TryStreamExt;
///
/// # async fn run(executor: RequestExecutor) -> Result<(), devops_pacer::error::ApiError> {
/// let walker = PaginationWalker::new(executor);
/// let request = PageRequest::new(OperationDescriptor::get("my-project/_apis/git/repositories"))
///     .with_page_size(100);
///
/// let mut items = walker.paginate(request);
/// while let Some(repo) = items.try_next().await? {
///     println!("{}", repo["name"]);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PaginationWalker {
    executor: RequestExecutor,
}

impl PaginationWalker {
    pub fn new(executor: RequestExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Lazily fetches pages in order.
    pub fn pages(&self, request: PageRequest) -> BoxStream<'static, Result<CursorPage, ApiError>> {
        let state = WalkState {
            executor: self.executor.clone(),
            cursor: Cursor::First(request.start_token.clone()),
            request,
            pages: 0,
            retrieved: 0,
        };
        stream::try_unfold(state, WalkState::fetch).boxed()
    }

    /// Lazily yields the records of every page, in page order.
    pub fn paginate(&self, request: PageRequest) -> BoxStream<'static, Result<Value, ApiError>> {
        self.pages(request)
            .map_ok(|page| stream::iter(page.items.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    /// Collects every record, failing with the first error.
    pub async fn collect_all(&self, request: PageRequest) -> Result<Vec<Value>, ApiError> {
        self.paginate(request).try_collect().await
    }
}

/// Extracts the records of a page.
///
/// Accepts the usual envelopes (`value`, `results`, `items`), a bare array,
/// or a single object treated as one record. `null` has no records.
pub fn extract_items(payload: &Value) -> Vec<Value> {
    match payload {
        Value::Null => Vec::new(),
        Value::Array(items) => items.clone(),
        Value::Object(fields) => ITEM_FIELDS
            .iter()
            .find_map(|name| fields.get(*name).and_then(Value::as_array))
            .cloned()
            .unwrap_or_else(|| vec![payload.clone()]),
        other => vec![other.clone()],
    }
}

/// Finds the continuation token of a response, if any. Empty tokens count
/// as absent.
pub fn extract_continuation_token(response: &ApiResponse) -> Option<String> {
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

    if let Some(token) = response.header(CONTINUATION_HEADER).and_then(non_empty) {
        return Some(token);
    }

    let fields = response.payload.as_object()?;
    if let Some(token) = TOKEN_FIELDS
        .iter()
        .find_map(|name| fields.get(*name).and_then(Value::as_str).and_then(non_empty))
    {
        return Some(token);
    }

    LINK_FIELDS
        .iter()
        .filter_map(|name| fields.get(*name).and_then(Value::as_str))
        .find_map(token_from_link)
}

fn token_from_link(link: &str) -> Option<String> {
    let url = match Url::parse(link) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse("https://localhost/")
            .and_then(|base| base.join(link))
            .ok()?,
        Err(_) => return None,
    };

    LINK_TOKEN_PARAMS.iter().find_map(|param| {
        url.query_pairs()
            .find(|(name, value)| name == param && !value.is_empty())
            .map(|(_, value)| value.into_owned())
    })
}
