//! The schema the site builder runs on.

use std::sync::LazyLock;

use crate::schema::{ColumnDescriptor, ListDescriptor, ListTemplate, SchemaRegistry};

pub const SMART_PAGES: &str = "SmartPages";
pub const SMART_CONTAINERS: &str = "SmartContainers";
pub const NEWS: &str = "News";
pub const EVENTS: &str = "Events";
pub const SLIDES: &str = "Slides";
pub const MAP_LOCATIONS: &str = "MapLocations";
pub const CONTACT_MESSAGES: &str = "ContactMessages";
pub const SITE_SETTINGS: &str = "SiteSettings";
pub const SMART_IMAGES: &str = "SmartImages";

static STANDARD: LazyLock<SchemaRegistry> = LazyLock::new(build);

impl SchemaRegistry {
    /// The embedded registry of the site builder.
    pub fn standard() -> &'static Self {
        &STANDARD
    }
}

// Slides and MapLocations precede their lookup target, SmartContainers.
fn build() -> SchemaRegistry {
    SchemaRegistry::new([
        ListDescriptor::new(SMART_PAGES, ListTemplate::GenericList)
            .described("Pages composed from containers")
            .columns([
                ColumnDescriptor::text("PageSlug")
                    .titled("Page slug")
                    .described("URL segment of the page")
                    .indexed(),
                ColumnDescriptor::choice("PageLayout", ["Default", "FullWidth", "Landing"])
                    .titled("Layout"),
                ColumnDescriptor::boolean("IsHomePage").titled("Home page"),
                ColumnDescriptor::boolean("Published"),
                ColumnDescriptor::number("SortOrder").titled("Sort order"),
                ColumnDescriptor::multiline("PageDescription")
                    .titled("Description")
                    .described("Shown in search results and link previews"),
            ]),
        ListDescriptor::new(SLIDES, ListTemplate::GenericList)
            .described("Slides shown by slider containers")
            .columns([
                ColumnDescriptor::url("SlideImage").titled("Image"),
                ColumnDescriptor::text("SlideCaption").titled("Caption"),
                ColumnDescriptor::url("SlideLink").titled("Link"),
                ColumnDescriptor::number("SortOrder").titled("Sort order"),
                ColumnDescriptor::lookup("Container", SMART_CONTAINERS).indexed(),
            ]),
        ListDescriptor::new(MAP_LOCATIONS, ListTemplate::GenericList)
            .described("Markers shown by map containers")
            .columns([
                ColumnDescriptor::text("Address"),
                ColumnDescriptor::number("Latitude"),
                ColumnDescriptor::number("Longitude"),
                ColumnDescriptor::lookup("Container", SMART_CONTAINERS).indexed(),
            ]),
        ListDescriptor::new(SMART_CONTAINERS, ListTemplate::GenericList)
            .described("Typed building blocks placed on pages")
            .columns([
                ColumnDescriptor::choice(
                    "ContainerType",
                    ["Hero", "Slider", "Grid", "Table", "Map", "ContactForm"],
                )
                .titled("Container type"),
                ColumnDescriptor::lookup("Page", SMART_PAGES)
                    .described("Page the container belongs to")
                    .indexed(),
                ColumnDescriptor::number("SortOrder").titled("Sort order"),
                ColumnDescriptor::multiline("ContainerSettings")
                    .titled("Settings")
                    .described("JSON settings of the container"),
            ]),
        ListDescriptor::new(NEWS, ListTemplate::GenericList)
            .described("News articles")
            .columns([
                ColumnDescriptor::multiline("NewsBody").titled("Body"),
                ColumnDescriptor::url("NewsImage").titled("Image"),
                ColumnDescriptor::date_time("PublishDate")
                    .titled("Publish date")
                    .indexed(),
                ColumnDescriptor::choice("NewsCategory", ["General", "Announcement", "Update"])
                    .titled("Category"),
                ColumnDescriptor::boolean("Featured"),
            ]),
        ListDescriptor::new(EVENTS, ListTemplate::Events)
            .described("Upcoming events")
            .columns([
                ColumnDescriptor::text("EventVenue").titled("Venue"),
                ColumnDescriptor::date_time("EventStart")
                    .titled("Starts")
                    .indexed(),
                ColumnDescriptor::date_time("EventEnd").titled("Ends"),
                ColumnDescriptor::url("EventImage").titled("Image"),
                ColumnDescriptor::url("RegistrationUrl").titled("Registration"),
                ColumnDescriptor::lookup("Page", SMART_PAGES).described("Page featuring the event"),
            ]),
        ListDescriptor::new(CONTACT_MESSAGES, ListTemplate::GenericList)
            .described("Messages submitted through contact forms")
            .columns([
                ColumnDescriptor::text("SenderName").titled("Name"),
                ColumnDescriptor::text("SenderEmail").titled("Email").indexed(),
                ColumnDescriptor::multiline("MessageBody").titled("Message"),
                ColumnDescriptor::date_time("SubmittedAt").titled("Submitted"),
                ColumnDescriptor::boolean("Handled"),
            ]),
        ListDescriptor::new(SITE_SETTINGS, ListTemplate::GenericList)
            .described("Key/value settings of the site")
            .columns([
                ColumnDescriptor::text("SettingKey").titled("Key").indexed(),
                ColumnDescriptor::multiline("SettingValue").titled("Value"),
            ]),
        ListDescriptor::new(SMART_IMAGES, ListTemplate::PictureLibrary)
            .described("Images used across the site")
            .column(ColumnDescriptor::text("AltText").titled("Alternative text")),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_is_valid() {
        let registry = SchemaRegistry::standard();
        let issues = registry.validate();
        assert!(issues.is_empty(), "unexpected issues: {issues:?}");
    }

    #[test]
    fn test_standard_registry_contents() {
        let registry = SchemaRegistry::standard();
        assert_eq!(registry.len(), 9);
        assert_eq!(
            registry.get(SMART_IMAGES).map(|l| l.template),
            Some(ListTemplate::PictureLibrary)
        );
        assert!(registry.lists().iter().all(|l| l.columns.iter().all(|c| !c.is_title())));
    }

    #[test]
    fn test_lookup_declared_before_target() {
        let registry = SchemaRegistry::standard();
        let position = |title: &str| registry.lists().iter().position(|l| l.title == title);
        assert!(position(SLIDES) < position(SMART_CONTAINERS));
    }
}
