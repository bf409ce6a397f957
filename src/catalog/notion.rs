//! Notion database as a [`CatalogSource`].
//!
//! Each database row (page) is one album:
//!
//! | Property (default name) | Notion type | Album field |
//! |---|---|---|
//! | `Series` | select | series name (`Uncategorized` when empty) |
//! | `Album` | title | title (`Untitled Album` when empty) |
//! | `Location` | rich_text | location |
//! | `Date` | date | date (`start`) |
//! | `Cover` | files | explicit cover (first file) |
//! | `Images` | files | images, before any page-body image blocks |
//!
//! Property names are configurable through [`PropertyNames`].
//!
//! Endpoints used: `POST /v1/databases/{id}/query`, `GET /v1/pages/{id}` and
//! `GET /v1/blocks/{id}/children`, all cursor-paginated where the API is.

use super::{
    AlbumRecord, CatalogSource, Page, SourceFetchError, UNCATEGORIZED_SERIES, UNTITLED_ALBUM,
    collect_pages, group_into_series,
};
use crate::naming;
use crate::types::{ImageRef, Series};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const DEFAULT_API_BASE: &str = "https://api.notion.com";
pub const NOTION_VERSION: &str = "2022-06-28";
/// Alt text when neither a file name nor a caption is available.
pub const DEFAULT_ALT: &str = "image";

/// Names of the database properties an album is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PropertyNames {
    pub series: String,
    pub title: String,
    pub location: String,
    pub date: String,
    pub cover: String,
    pub images: String,
}

impl Default for PropertyNames {
    fn default() -> Self {
        Self {
            series: "Series".to_string(),
            title: "Album".to_string(),
            location: "Location".to_string(),
            date: "Date".to_string(),
            cover: "Cover".to_string(),
            images: "Images".to_string(),
        }
    }
}

/// Map one database page to an [`AlbumRecord`].
///
/// Missing or mistyped properties fall back to their defaults; only a page
/// without an `id` is rejected.
pub fn map_album_page(page: &Value, names: &PropertyNames) -> Result<AlbumRecord, String> {
    let id = page
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| "page has no id".to_string())?
        .to_string();
    let props = page.get("properties").unwrap_or(&Value::Null);

    let series_name = props
        .get(&names.series)
        .and_then(|p| p.pointer("/select/name"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNCATEGORIZED_SERIES)
        .to_string();

    let title = props
        .get(&names.title)
        .and_then(|p| p.get("title"))
        .map(plain_text)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| UNTITLED_ALBUM.to_string());

    let location = props
        .get(&names.location)
        .and_then(|p| p.get("rich_text"))
        .map(plain_text)
        .unwrap_or_default();

    let date = props
        .get(&names.date)
        .and_then(|p| p.pointer("/date/start"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let cover_url = props
        .get(&names.cover)
        .map(file_urls)
        .and_then(|urls| urls.into_iter().next());

    Ok(AlbumRecord {
        id,
        series_name,
        title,
        location,
        date,
        cover_url,
    })
}

/// Concatenated `plain_text` of a rich-text array.
fn plain_text(rich: &Value) -> String {
    rich.as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| {
                    p.get("plain_text")
                        .or_else(|| p.pointer("/text/content"))
                        .and_then(Value::as_str)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// URL of a Notion file object (`file` or `external`).
fn file_object_url(obj: &Value) -> Option<String> {
    obj.pointer("/file/url")
        .or_else(|| obj.pointer("/external/url"))
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
}

/// URLs of a `files` property, in order.
fn file_urls(property: &Value) -> Vec<String> {
    property
        .get("files")
        .and_then(Value::as_array)
        .map(|files| files.iter().filter_map(file_object_url).collect())
        .unwrap_or_default()
}

/// Images listed in the page's images property.
pub fn property_images(page: &Value, names: &PropertyNames) -> Vec<ImageRef> {
    page.get("properties")
        .and_then(|p| p.get(&names.images))
        .map(file_urls)
        .unwrap_or_default()
        .into_iter()
        .map(|url| {
            let alt = naming::url_file_name(&url)
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| DEFAULT_ALT.to_string());
            ImageRef::new(url, alt)
        })
        .collect()
}

/// Image from a page-body block, if it is an image block.
pub fn block_image(block: &Value) -> Option<ImageRef> {
    if block.get("type").and_then(Value::as_str) != Some("image") {
        return None;
    }
    let image = block.get("image")?;
    let url = file_object_url(image)?;
    let caption = image.get("caption").map(plain_text).unwrap_or_default();
    let alt = if caption.trim().is_empty() {
        DEFAULT_ALT.to_string()
    } else {
        caption
    };
    Some(ImageRef::new(url, alt))
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

impl From<ListResponse> for Page<Value> {
    fn from(r: ListResponse) -> Self {
        Page {
            items: r.results,
            has_more: r.has_more,
            next_cursor: r.next_cursor,
        }
    }
}

/// Blocking Notion API client reading albums from one database.
pub struct NotionCatalog {
    client: reqwest::blocking::Client,
    api_base: String,
    api_key: String,
    database_id: String,
    page_size: u32,
    properties: PropertyNames,
}

impl NotionCatalog {
    pub fn new(
        client: reqwest::blocking::Client,
        api_key: impl Into<String>,
        database_id: impl Into<String>,
        properties: PropertyNames,
    ) -> Self {
        Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: api_key.into(),
            database_id: database_id.into(),
            page_size: 100,
            properties,
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, 100);
        self
    }

    fn send(
        &self,
        context: &str,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<Value, SourceFetchError> {
        let response = request
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .map_err(|source| SourceFetchError::Transport {
                context: context.to_string(),
                source,
            })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(SourceFetchError::Auth {
                context: context.to_string(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(SourceFetchError::Status {
                context: context.to_string(),
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        response.json().map_err(|e| SourceFetchError::Malformed {
            context: context.to_string(),
            message: e.to_string(),
        })
    }

    fn list(&self, context: &str, value: Value) -> Result<Page<Value>, SourceFetchError> {
        serde_json::from_value::<ListResponse>(value)
            .map(Page::from)
            .map_err(|e| SourceFetchError::Malformed {
                context: context.to_string(),
                message: e.to_string(),
            })
    }

    fn query_database(&self) -> Result<Vec<Value>, SourceFetchError> {
        let context = format!("database {}", self.database_id);
        let url = format!("{}/v1/databases/{}/query", self.api_base, self.database_id);
        collect_pages(&context, |cursor| {
            let mut body = json!({ "page_size": self.page_size });
            if let Some(c) = cursor {
                body["start_cursor"] = Value::String(c.to_string());
            }
            let value = self.send(&context, self.client.post(&url).json(&body))?;
            self.list(&context, value)
        })
    }

    fn retrieve_page(&self, page_id: &str) -> Result<Value, SourceFetchError> {
        let context = format!("page {}", page_id);
        let url = format!("{}/v1/pages/{}", self.api_base, page_id);
        self.send(&context, self.client.get(&url))
    }

    fn block_children(&self, block_id: &str) -> Result<Vec<Value>, SourceFetchError> {
        let context = format!("blocks of {}", block_id);
        let url = format!("{}/v1/blocks/{}/children", self.api_base, block_id);
        collect_pages(&context, |cursor| {
            let mut query = vec![("page_size", self.page_size.to_string())];
            if let Some(c) = cursor {
                query.push(("start_cursor", c.to_string()));
            }
            let value = self.send(&context, self.client.get(&url).query(&query))?;
            self.list(&context, value)
        })
    }

    fn map_page(&self, page: &Value) -> Result<AlbumRecord, SourceFetchError> {
        map_album_page(page, &self.properties).map_err(|message| SourceFetchError::Malformed {
            context: format!("database {}", self.database_id),
            message,
        })
    }
}

impl CatalogSource for NotionCatalog {
    fn fetch_catalog(&self) -> Result<Vec<Series>, SourceFetchError> {
        let pages = self.query_database()?;
        tracing::debug!(pages = pages.len(), "database rows read");
        let records = pages
            .iter()
            .map(|p| self.map_page(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(group_into_series(records))
    }

    fn fetch_album_images(&self, album_id: &str) -> Result<Vec<ImageRef>, SourceFetchError> {
        let page = self.retrieve_page(album_id)?;
        let mut images = property_images(&page, &self.properties);
        images.extend(self.block_children(album_id)?.iter().filter_map(block_image));
        Ok(images)
    }

    fn fetch_album(&self, album_id: &str) -> Result<Series, SourceFetchError> {
        let page = self.retrieve_page(album_id)?;
        let record = self.map_page(&page)?;
        group_into_series(vec![record])
            .into_iter()
            .next()
            .ok_or_else(|| SourceFetchError::Malformed {
                context: format!("page {}", album_id),
                message: "page did not map to an album".to_string(),
            })
    }
}
