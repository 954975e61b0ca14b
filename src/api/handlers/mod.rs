mod admin;
mod files;
mod static_files;

pub use admin::{admin_purge, health};
pub use files::{
    add_tag, delete_file, get_file, get_shared_file, list_files, move_file, remove_tag,
    replace_tags, share_file, upload_file,
};
pub use static_files::serve_upload;
