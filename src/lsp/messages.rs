//! Parameter builders for the LSP methods the probe exercises.

use lsp_types::{
    ClientCapabilities, CompletionClientCapabilities, CompletionItemCapability, CompletionParams,
    DidOpenTextDocumentParams, InitializeParams, PartialResultParams, Position,
    TextDocumentClientCapabilities, TextDocumentIdentifier, TextDocumentItem,
    TextDocumentPositionParams, Url, WorkDoneProgressParams, WorkspaceFolder,
};

// rootUri is deprecated in the protocol but still what single-root servers
// key on, so it is sent alongside workspaceFolders.
#[allow(deprecated)]
pub fn initialize_params(root: &Url) -> InitializeParams {
    InitializeParams {
        process_id: Some(std::process::id()),
        root_uri: Some(root.clone()),
        workspace_folders: Some(vec![WorkspaceFolder {
            uri: root.clone(),
            name: workspace_name(root),
        }]),
        capabilities: ClientCapabilities {
            text_document: Some(TextDocumentClientCapabilities {
                completion: Some(CompletionClientCapabilities {
                    completion_item: Some(CompletionItemCapability {
                        snippet_support: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn did_open_params(
    uri: &Url,
    language_id: &str,
    version: i32,
    text: &str,
) -> DidOpenTextDocumentParams {
    DidOpenTextDocumentParams {
        text_document: TextDocumentItem {
            uri: uri.clone(),
            language_id: language_id.to_string(),
            version,
            text: text.to_string(),
        },
    }
}

pub fn completion_params(uri: &Url, line: u32, character: u32) -> CompletionParams {
    CompletionParams {
        text_document_position: TextDocumentPositionParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            position: Position { line, character },
        },
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
        context: None,
    }
}

fn workspace_name(root: &Url) -> String {
    root.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or("workspace")
        .to_string()
}
