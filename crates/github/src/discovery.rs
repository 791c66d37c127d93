//! Lazy candidate discovery.
//!
//! Trusted sources are walked first, in priority table order, one app
//! branch each. Code search follows when enabled and a token is present.
//! Each listing request is issued only when the consumer polls for more.
//! DLC branches are listed separately once the app's DLC ids are known.

use depotsync_model::{AppId, ErrorKind, PipelineEvent, SourceError};
use futures_util::stream::{self, Stream, StreamExt};
use percent_encoding::{AsciiSet, CONTROLS, NON_ALPHANUMERIC, utf8_percent_encode};
use tracing::{debug, info, warn};

use crate::SEARCH_SOURCE;
use crate::client::GitHubClient;
use crate::parse::{self, CandidateKind};
use crate::sources::TrustedSource;
use crate::types::{BranchResponse, CandidateFile, CandidateLocation, TreeResponse};

/// Characters escaped inside a single URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

enum Cursor {
    Source(usize),
    Search { url: String, page: u32 },
    Done,
}

impl GitHubClient {
    /// Streams candidate files for an app.
    ///
    /// A source without a branch for the app emits `SourceEmpty` and yields
    /// nothing. Listing failures are yielded as errors and discovery moves
    /// on to the next source.
    pub fn search_candidates(
        &self,
        app_id: AppId,
    ) -> impl Stream<Item = Result<CandidateFile, SourceError>> + '_ {
        stream::unfold(Cursor::Source(0), move |cursor| async move {
            match cursor {
                Cursor::Done => None,
                Cursor::Source(index) => match self.sources.sources().get(index) {
                    Some(source) => {
                        let batch = match self.list_branch(app_id, source).await {
                            Ok(files) => files.into_iter().map(Ok).collect(),
                            Err(e) => {
                                warn!(source = %source.repo, error = %e, "source listing failed");
                                vec![Err(SourceError::new(source.repo.clone(), e))]
                            }
                        };
                        Some((batch, Cursor::Source(index + 1)))
                    }
                    None if self.search_enabled() => Some((
                        Vec::new(),
                        Cursor::Search {
                            url: self.search_url(app_id),
                            page: 1,
                        },
                    )),
                    None => None,
                },
                Cursor::Search { url, page } => match self.search_page(&url).await {
                    Ok((files, next)) => {
                        let cursor = match next {
                            Some(next) if page < self.config.max_pages => Cursor::Search {
                                url: next,
                                page: page + 1,
                            },
                            _ => Cursor::Done,
                        };
                        Some((files.into_iter().map(Ok).collect(), cursor))
                    }
                    Err(e) => {
                        warn!(page, error = %e, "code search failed");
                        Some((vec![Err(SourceError::new(SEARCH_SOURCE, e))], Cursor::Done))
                    }
                },
            }
        })
        .flat_map(stream::iter)
    }

    /// Streams candidate files from the `{dlc_id}` branch of each source.
    ///
    /// Branches are listed one at a time, source by source. A missing
    /// branch emits `SourceEmpty` like a missing app branch does.
    pub fn dlc_candidates(
        &self,
        dlc_ids: Vec<u32>,
        sources: Vec<TrustedSource>,
    ) -> impl Stream<Item = Result<CandidateFile, SourceError>> + '_ {
        let branches: Vec<(TrustedSource, AppId)> = sources
            .into_iter()
            .flat_map(|source| {
                dlc_ids
                    .iter()
                    .filter_map(|&id| AppId::new(i64::from(id)).ok())
                    .map(move |id| (source.clone(), id))
                    .collect::<Vec<_>>()
            })
            .collect();

        stream::iter(branches)
            .then(move |(source, dlc_id)| async move {
                match self.list_branch(dlc_id, &source).await {
                    Ok(files) => files.into_iter().map(Ok).collect::<Vec<_>>(),
                    Err(e) => {
                        warn!(source = %source.repo, dlc_id = %dlc_id, error = %e, "dlc branch listing failed");
                        vec![Err(SourceError::new(source.repo, e))]
                    }
                }
            })
            .flat_map(stream::iter)
    }

    fn search_enabled(&self) -> bool {
        self.config.search_code && self.config.token.is_some() && self.config.max_pages > 0
    }

    fn search_url(&self, app_id: AppId) -> String {
        let query = format!("{app_id} in:path extension:manifest");
        format!(
            "{}/search/code?q={}&per_page={}",
            self.config.api_base,
            utf8_percent_encode(&query, NON_ALPHANUMERIC),
            self.config.per_page.clamp(1, 100)
        )
    }

    /// Lists candidate blobs on the branch named after `app_id`.
    async fn list_branch(
        &self,
        app_id: AppId,
        source: &TrustedSource,
    ) -> Result<Vec<CandidateFile>, ErrorKind> {
        let branch_url = format!(
            "{}/repos/{}/branches/{}",
            self.config.api_base, source.repo, app_id
        );
        let branch: BranchResponse = match self.get_json(&source.repo, &branch_url).await {
            Ok(branch) => branch,
            Err(ErrorKind::NotFound(_)) => {
                info!(source = %source.repo, app_id = %app_id, "source has no branch for app");
                self.events.emit(PipelineEvent::SourceEmpty {
                    source_id: source.repo.clone(),
                });
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let commit_sha = branch.commit.sha;
        let observed_at = branch.commit.commit.committer.and_then(|c| c.date);
        let tree_url = format!("{}?recursive=1", branch.commit.commit.tree.url);
        let tree: TreeResponse = self.get_json(&source.repo, &tree_url).await?;
        if tree.truncated {
            warn!(source = %source.repo, app_id = %app_id, "branch tree listing truncated");
        }

        let files: Vec<CandidateFile> = tree
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob")
            .filter(|entry| {
                let name = entry.path.rsplit('/').next().unwrap_or(&entry.path);
                parse::classify(name).is_some()
            })
            .map(|entry| {
                let url = format!(
                    "{}/{}/{}/{}",
                    self.config.raw_base,
                    source.repo,
                    commit_sha,
                    encode_path(&entry.path)
                );
                CandidateFile {
                    source_id: source.repo.clone(),
                    source_priority: source.priority,
                    path: entry.path,
                    location: CandidateLocation::Raw(url),
                    observed_at,
                }
            })
            .collect();

        debug!(source = %source.repo, app_id = %app_id, count = files.len(), "listed branch");
        for file in &files {
            self.events.emit(PipelineEvent::CandidateFound {
                source_id: file.source_id.clone(),
                path: file.path.clone(),
            });
        }
        Ok(files)
    }

    /// Reads one code search page. Returns its manifest hits and the next
    /// page URL.
    async fn search_page(&self, url: &str) -> Result<(Vec<CandidateFile>, Option<String>), ErrorKind> {
        let (resp, next) = self.get_page(url).await?;
        if resp.incomplete_results {
            debug!(%url, "code search results incomplete");
        }

        let files: Vec<CandidateFile> = resp
            .items
            .into_iter()
            .filter(|item| parse::classify(&item.name) == Some(CandidateKind::Manifest))
            .map(|item| {
                let repo = item.repository.full_name;
                CandidateFile {
                    source_id: self.sources.source_id(&repo),
                    source_priority: self.sources.priority_of(&repo),
                    path: item.path,
                    location: CandidateLocation::Contents(item.url),
                    observed_at: None,
                }
            })
            .collect();

        for file in &files {
            self.events.emit(PipelineEvent::CandidateFound {
                source_id: file.source_id.clone(),
                path: file.path.clone(),
            });
        }
        Ok((files, next))
    }
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}
