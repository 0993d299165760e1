use std::path::PathBuf;

use rfd::{FileDialog, MessageButtons, MessageDialog, MessageDialogResult, MessageLevel};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

/// Blocking user prompts. Only ever called from the UI thread.
pub trait Dialogs {
    fn confirm(&self, title: &str, description: &str) -> bool;
    fn show_error(&self, title: &str, description: &str);
    fn show_info(&self, title: &str, description: &str);
    fn pick_image(&self) -> Option<PathBuf>;
    fn pick_save_path(&self, default_name: &str) -> Option<PathBuf>;
}

/// Native dialogs provided by the desktop.
pub struct NativeDialogs;

impl Dialogs for NativeDialogs {
    fn confirm(&self, title: &str, description: &str) -> bool {
        MessageDialog::new()
            .set_level(MessageLevel::Info)
            .set_title(title)
            .set_description(description)
            .set_buttons(MessageButtons::YesNo)
            .show()
            == MessageDialogResult::Yes
    }

    fn show_error(&self, title: &str, description: &str) {
        MessageDialog::new()
            .set_level(MessageLevel::Error)
            .set_title(title)
            .set_description(description)
            .set_buttons(MessageButtons::Ok)
            .show();
    }

    fn show_info(&self, title: &str, description: &str) {
        MessageDialog::new()
            .set_level(MessageLevel::Info)
            .set_title(title)
            .set_description(description)
            .set_buttons(MessageButtons::Ok)
            .show();
    }

    fn pick_image(&self) -> Option<PathBuf> {
        FileDialog::new()
            .set_title("Select an image")
            .add_filter("Image Files", &IMAGE_EXTENSIONS)
            .pick_file()
    }

    fn pick_save_path(&self, default_name: &str) -> Option<PathBuf> {
        FileDialog::new()
            .set_title("Save image")
            .set_file_name(default_name)
            .add_filter("PNG files", &["png"])
            .save_file()
    }
}
