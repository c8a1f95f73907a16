//! Domain methods for the Shelf API client.
//!
//! One method per backend operation used by the upload lifecycle and the library
//! management commands.

use crate::ApiClient;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;
use shelf_core::models::{
    CancelUploadRequest, FileId, FileKey, FileSortColumn, LibraryFile, LibraryFilesPage,
    PrepareFileRequest, PreparedUpload, SortDirection, UPLOAD_TOKEN_HEADER,
};
use shelf_core::{UploadError, UploadResult};
use validator::Validate;

const PREPARE_FILE_MUTATION: &str = r#"
mutation prepareDesktopFile($file: AiLibraryFileInput!) {
  prepareFile(data: $file) {
    id
  }
}"#;

const CANCEL_FILE_UPLOAD_MUTATION: &str = r#"
mutation cancelFileUpload($fileId: String!, $libraryId: String!) {
  cancelFileUpload(fileId: $fileId, libraryId: $libraryId)
}"#;

const PROCESS_FILE_MUTATION: &str = r#"
mutation reProcessFile($id: String!) {
  processFile(fileId: $id) {
    id
    name
    chunks
    size
    uploadedAt
    processedAt
    processingErrorMessage
  }
}"#;

const DROP_FILE_MUTATION: &str = r#"
mutation dropFile($id: String!) {
  dropFile(fileId: $id) {
    id
  }
}"#;

const LIBRARY_FILES_QUERY: &str = r#"
query libraryFiles(
  $libraryId: String!
  $sortColumn: String
  $sortDirection: SortDirection
  $page: Int
  $itemsPerPage: Int
) {
  aiLibraryFiles(
    libraryId: $libraryId
    sortColumn: $sortColumn
    sortDirection: $sortDirection
    page: $page
    itemsPerPage: $itemsPerPage
  ) {
    id
    name
    originUri
    mimeType
    size
    chunks
    uploadedAt
    processedAt
    processingErrorMessage
    dropError
  }
  totalCount: aiLibraryFilesCount(libraryId: $libraryId)
}"#;

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrepareFileData {
    prepare_file: Option<IdOnly>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessFileData {
    process_file: Option<LibraryFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DropFileData {
    drop_file: Option<IdOnly>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LibraryFilesData {
    ai_library_files: Vec<LibraryFile>,
    total_count: i64,
}

impl ApiClient {
    /// Reserve a file slot in a library. The returned id doubles as the upload token.
    #[tracing::instrument(skip(self, request), fields(file_name = %request.name, library_id = %request.library_id))]
    pub async fn prepare_file(&self, request: &PrepareFileRequest) -> UploadResult<FileId> {
        request.validate()?;

        let data: PrepareFileData = self
            .graphql(PREPARE_FILE_MUTATION, json!({ "file": request }))
            .await
            .map_err(|e| match e {
                UploadError::Backend(reason) => UploadError::PreparationRejected {
                    file_name: request.name.clone(),
                    reason,
                },
                other => other,
            })?;

        let prepared = data.prepare_file.ok_or_else(|| UploadError::PreparationRejected {
            file_name: request.name.clone(),
            reason: "Failed to prepare file".to_string(),
        })?;

        tracing::debug!(file_id = %prepared.id, "File prepared");
        Ok(FileId::new(prepared.id))
    }

    /// Upload target for a prepared file: the public upload endpoint plus the
    /// headers that authorize the transfer.
    pub fn upload_target(&self, file_key: FileKey, file_name: &str, file_id: &FileId) -> PreparedUpload {
        let auth = self.auth();
        let mut headers = vec![
            ("Authorization".to_string(), auth.authorization()),
            (UPLOAD_TOKEN_HEADER.to_string(), file_id.to_string()),
        ];
        if let Some(jwt) = &auth.user_jwt {
            headers.push((crate::USER_JWT_HEADER.to_string(), jwt.clone()));
        }

        PreparedUpload {
            file_key,
            file_id: file_id.clone(),
            file_name: file_name.to_string(),
            upload_url: self.build_public_url("/upload"),
            method: "POST".to_string(),
            headers,
        }
    }

    /// Tell the backend to release a file reservation.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_file_upload(&self, file_id: &FileId, library_id: &str) -> UploadResult<()> {
        let request = CancelUploadRequest {
            file_id: file_id.to_string(),
            library_id: library_id.to_string(),
        };
        request.validate()?;

        let _: serde_json::Value = self
            .graphql(CANCEL_FILE_UPLOAD_MUTATION, json!(request))
            .await?;
        Ok(())
    }

    /// Queue a file for (re)processing.
    #[tracing::instrument(skip(self))]
    pub async fn process_file(&self, file_id: &FileId) -> UploadResult<LibraryFile> {
        let data: ProcessFileData = self
            .graphql(PROCESS_FILE_MUTATION, json!({ "id": file_id }))
            .await?;
        data.process_file
            .ok_or_else(|| UploadError::Backend(format!("Failed to process file {}", file_id)))
    }

    #[tracing::instrument(skip(self))]
    pub async fn drop_file(&self, file_id: &FileId) -> UploadResult<FileId> {
        let data: DropFileData = self
            .graphql(DROP_FILE_MUTATION, json!({ "id": file_id }))
            .await?;
        data.drop_file
            .map(|f| FileId::new(f.id))
            .ok_or_else(|| UploadError::Backend(format!("Failed to drop file {}", file_id)))
    }

    /// Drop several files concurrently. One result per input id, in input order.
    pub async fn drop_files(&self, file_ids: &[FileId]) -> Vec<(FileId, UploadResult<FileId>)> {
        let results = join_all(file_ids.iter().map(|id| self.drop_file(id))).await;
        file_ids.iter().cloned().zip(results).collect()
    }

    /// One page of a library's files, plus the total count.
    #[tracing::instrument(skip(self))]
    pub async fn list_library_files(
        &self,
        library_id: &str,
        sort_column: FileSortColumn,
        sort_direction: SortDirection,
        page: u32,
        items_per_page: u32,
    ) -> UploadResult<LibraryFilesPage> {
        if library_id.trim().is_empty() {
            return Err(UploadError::InvalidInput(
                "Library ID must not be empty".to_string(),
            ));
        }

        let data: LibraryFilesData = self
            .graphql(
                LIBRARY_FILES_QUERY,
                json!({
                    "libraryId": library_id,
                    "sortColumn": sort_column.as_str(),
                    "sortDirection": sort_direction.as_str(),
                    "page": page,
                    "itemsPerPage": items_per_page,
                }),
            )
            .await?;

        Ok(LibraryFilesPage {
            files: data.ai_library_files,
            total_count: data.total_count,
        })
    }
}
